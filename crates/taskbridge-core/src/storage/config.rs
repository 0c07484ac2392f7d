//! TOML-based application configuration.
//!
//! Stores:
//! - Sync settings (enabled flag, list concurrency, pagination limits)
//! - Google OAuth client credentials and endpoints
//!
//! Configuration is stored at `~/.config/taskbridge/config.toml`.
//! `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` override the file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lists whose task phase may run at the same time.
    #[serde(default = "default_max_concurrent_lists")]
    pub max_concurrent_lists: usize,
    /// Upper bound on pages followed per collection fetch.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// `maxResults` sent with every list request. The service caps it at 100.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Google Tasks endpoints and OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/taskbridge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent_lists() -> usize {
    4
}
fn default_max_pages() -> usize {
    50
}
fn default_page_size() -> u32 {
    100
}
fn default_api_base() -> String {
    "https://tasks.googleapis.com/tasks/v1".into()
}
fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn default_redirect_port() -> u16 {
    19821
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_lists: default_max_concurrent_lists(),
            max_pages: default_max_pages(),
            page_size: default_page_size(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_api_base(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            redirect_port: default_redirect_port(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };

        let mut current = root;
        if let Some(parent_path) = parent_path {
            for part in parent_path.split('.') {
                current = current
                    .get_mut(part)
                    .ok_or_else(|| invalid("unknown config key".into()))?;
            }
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| invalid("unknown config key".into()))?;
        let existing = obj
            .get(leaf)
            .ok_or_else(|| invalid("unknown config key".into()))?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                serde_json::Value::Number(n.into())
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Config>(&content).map_err(|e| {
                ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                cfg
            }
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Persist to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        super::write_atomic(path, content.as_bytes()).map_err(|e| save_failed(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(id) = std::env::var("GOOGLE_CLIENT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.google.client_id = id;
        }
        if let Some(secret) = std::env::var("GOOGLE_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.google.client_secret = secret;
        }
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }
}
