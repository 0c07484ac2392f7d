mod config;
mod json_store;
mod local_store;

pub use config::{Config, GoogleConfig, SyncConfig};
pub use json_store::JsonStore;
pub use local_store::{LocalStore, MemoryStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/taskbridge[-dev]/` based on TASKBRIDGE_ENV.
///
/// Set TASKBRIDGE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TASKBRIDGE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("taskbridge-dev")
    } else {
        base_dir.join("taskbridge")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}

/// Write `contents` to `path` via a sibling temp file and a rename, so a
/// reader never observes a half-written file.
pub fn write_atomic(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
