use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, Result};

/// How the user supplied the reference material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Zip,
    Text,
    Image,
    Tebex,
    Video,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Esx,
    Qbcore,
    Standalone,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MysqlType {
    #[default]
    #[serde(rename = "mysql-async")]
    MysqlAsync,
    #[serde(rename = "oxmysql")]
    Oxmysql,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibType {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "ox_lib")]
    OxLib,
}

/// Cross-mode preferences. Fixed for the lifetime of a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub framework: Framework,
    pub mysql_type: MysqlType,
    pub lib_type: LibType,
    pub script_name: String,
}

/// A file from an uploaded reference archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub path: String,
    pub content: String,
}

/// The reference material, tagged by mode on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum GenerationSource {
    Zip {
        reference_files: Vec<ReferenceFile>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Text {
        description: String,
    },
    Image {
        images: Vec<String>,
    },
    Tebex {
        tebex_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_context: Option<String>,
    },
    Video {
        video_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_context: Option<String>,
    },
}

impl GenerationSource {
    pub fn mode(&self) -> GenerationMode {
        match self {
            GenerationSource::Zip { .. } => GenerationMode::Zip,
            GenerationSource::Text { .. } => GenerationMode::Text,
            GenerationSource::Image { .. } => GenerationMode::Image,
            GenerationSource::Tebex { .. } => GenerationMode::Tebex,
            GenerationSource::Video { .. } => GenerationMode::Video,
        }
    }
}

/// Body POSTed to the generation endpoint:
/// `{"mode": .., "framework": .., "scriptName": .., <mode fields>}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(flatten)]
    pub source: GenerationSource,
    #[serde(flatten)]
    pub preferences: Preferences,
}

impl GenerationRequest {
    pub fn new(source: GenerationSource, preferences: Preferences) -> Self {
        Self {
            source,
            preferences,
        }
    }

    pub fn mode(&self) -> GenerationMode {
        self.source.mode()
    }

    pub fn script_name(&self) -> &str {
        self.preferences.script_name.trim()
    }

    /// Checks that every field the selected mode needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.script_name().is_empty() {
            return Err(invalid("Enter a name for the script"));
        }

        match &self.source {
            GenerationSource::Text { description } => {
                if description.trim().is_empty() {
                    return Err(invalid("Enter a description of the script"));
                }
            }
            GenerationSource::Zip {
                reference_files, ..
            } => {
                if reference_files.is_empty() {
                    return Err(invalid("Upload a .zip with at least one reference file"));
                }
            }
            GenerationSource::Image { images } => {
                if images.is_empty() {
                    return Err(invalid("Add at least one image"));
                }
                if !images.iter().all(|img| img.starts_with("data:")) {
                    return Err(invalid("Images must be provided as data URIs"));
                }
            }
            GenerationSource::Tebex { tebex_url, .. } => {
                if tebex_url.trim().is_empty() {
                    return Err(invalid("Add the Tebex link for the script"));
                }
                if !is_store_url(tebex_url) {
                    return Err(invalid("Enter a valid Tebex or FiveM store link"));
                }
            }
            GenerationSource::Video { video_url, .. } => {
                if video_url.trim().is_empty() {
                    return Err(invalid("Add the video link for the script"));
                }
                if !is_video_url(video_url) {
                    return Err(invalid(
                        "Enter a valid YouTube, Twitch or other video platform link",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> GeneratorError {
    GeneratorError::Validation(message.to_string())
}

fn host_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    parsed.host_str().map(str::to_ascii_lowercase)
}

/// Tebex / FiveM store pages.
pub fn is_store_url(raw: &str) -> bool {
    let Some(host) = host_of(raw) else {
        return false;
    };
    ["tebex", "buycraft", "fivem.net", "cfx.re"]
        .iter()
        .any(|needle| host.contains(needle))
        || raw.contains("tebex.io")
}

/// Video platforms the backend knows how to describe.
pub fn is_video_url(raw: &str) -> bool {
    let Some(host) = host_of(raw) else {
        return false;
    };
    [
        "youtube.com",
        "youtu.be",
        "twitch.tv",
        "streamable.com",
        "vimeo.com",
    ]
    .iter()
    .any(|needle| host.contains(needle))
}

/// Encodes image bytes as a `data:` URI, guessing the MIME type from the file name.
pub fn image_data_uri(bytes: &[u8], file_name: &str) -> String {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}
