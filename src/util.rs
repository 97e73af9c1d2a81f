use std::path::{Component, Path, PathBuf};

use crate::error::{GeneratorError, Result};

/// Expands a leading `~` to the user's home directory.
/// Paths without a tilde, or when no home directory is known, are returned as-is.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(path),
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
    }
}

/// Turns a model-supplied file path into a relative path that stays inside
/// its destination folder. Backslashes count as separators.
pub fn safe_relative_path(raw: &str) -> Result<PathBuf> {
    let normalized = raw.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Err(GeneratorError::Custom("Empty file path".into()));
    }
    if normalized.starts_with('/') {
        return Err(GeneratorError::Custom(format!(
            "Absolute file path not allowed: {raw}"
        )));
    }

    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        match Path::new(part).components().next() {
            Some(Component::Normal(_)) => out.push(part),
            _ => {
                return Err(GeneratorError::Custom(format!(
                    "File path escapes the bundle: {raw}"
                )))
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(GeneratorError::Custom(format!("Invalid file path: {raw}")));
    }
    Ok(out)
}
