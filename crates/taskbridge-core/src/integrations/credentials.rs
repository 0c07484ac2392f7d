//! Where OAuth tokens live between runs.

use std::sync::Mutex;

use super::keyring_store;
use super::oauth::OAuthTokens;
use crate::error::OAuthError;

/// Keyring entry holding the Google Tasks tokens.
pub const GOOGLE_TASKS_KEY: &str = "google_tasks";

/// Secure persistence for one set of tokens.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<OAuthTokens>, OAuthError>;
    fn save(&self, tokens: &OAuthTokens) -> Result<(), OAuthError>;
    fn clear(&self) -> Result<(), OAuthError>;
}

/// Tokens stored as JSON in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    key: String,
}

impl KeyringCredentialStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(GOOGLE_TASKS_KEY)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<OAuthTokens>, OAuthError> {
        let Some(json) = keyring_store::get(&self.key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                // An unreadable entry is as good as none; the user signs in again.
                tracing::warn!(key = %self.key, error = %e, "discarding unreadable stored tokens");
                Ok(None)
            }
        }
    }

    fn save(&self, tokens: &OAuthTokens) -> Result<(), OAuthError> {
        let json =
            serde_json::to_string(tokens).map_err(|e| OAuthError::Storage(e.to_string()))?;
        keyring_store::set(&self.key, &json)
    }

    fn clear(&self) -> Result<(), OAuthError> {
        keyring_store::delete(&self.key)
    }
}

/// Process-local store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<Option<OAuthTokens>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: OAuthTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<OAuthTokens>>, OAuthError> {
        self.tokens
            .lock()
            .map_err(|_| OAuthError::Storage("credential lock poisoned".into()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<OAuthTokens>, OAuthError> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, tokens: &OAuthTokens) -> Result<(), OAuthError> {
        *self.slot()? = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), OAuthError> {
        *self.slot()? = None;
        Ok(())
    }
}
