use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GeneratorError, Result};
use crate::request::{Framework, LibType, MysqlType, Preferences};

/// Endpoint used when neither the config file nor the command line names one.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:54321/functions/v1/generate-script";

const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FxforgeConfig {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub framework: Framework,
    pub mysql_type: MysqlType,
    pub lib_type: LibType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

impl Default for FxforgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            endpoint: None,
            api_key: None,
            framework: Framework::default(),
            mysql_type: MysqlType::default(),
            lib_type: LibType::default(),
            output_dir: None,
        }
    }
}

impl FxforgeConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    /// Preferences for a new request, seeded from the saved defaults.
    pub fn preferences(&self, script_name: &str) -> Preferences {
        Preferences {
            framework: self.framework,
            mysql_type: self.mysql_type,
            lib_type: self.lib_type,
            script_name: script_name.to_string(),
        }
    }
}

/// `~/.fxforge`, home of the config file and the transcript logs.
pub fn fxforge_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fxforge"))
}

pub fn config_path() -> Option<PathBuf> {
    fxforge_dir().map(|d| d.join("config.json"))
}

/// Reads a config file. A missing or unreadable file yields `None`.
pub fn load_config_from(path: &Path) -> Option<FxforgeConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// The user's config, or defaults when there is none yet.
pub fn load_config() -> FxforgeConfig {
    config_path()
        .and_then(|p| load_config_from(&p))
        .unwrap_or_default()
}

pub fn save_config_to(path: &Path, config: &FxforgeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn save_config(config: &FxforgeConfig) -> Result<PathBuf> {
    let path =
        config_path().ok_or_else(|| GeneratorError::Custom("Cannot find home directory".into()))?;
    save_config_to(&path, config)?;
    Ok(path)
}

/// Loads the config, applies `change`, and writes it back.
pub fn update_config(change: impl FnOnce(&mut FxforgeConfig)) -> Result<FxforgeConfig> {
    let mut config = load_config();
    change(&mut config);
    config.version = CONFIG_VERSION;
    save_config(&config)?;
    Ok(config)
}
