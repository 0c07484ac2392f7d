pub mod auth;
pub mod credentials;
pub mod google_tasks;
pub mod oauth;

pub use auth::{CredentialProvider, TokenSource};
pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use google_tasks::{GoogleTasksClient, ListTasksQuery, Page, TasksApi};
pub use oauth::{OAuthConfig, OAuthTokens, PkceChallenge};

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    use crate::error::OAuthError;

    const SERVICE: &str = "taskbridge";

    fn entry(key: &str) -> Result<keyring::Entry, OAuthError> {
        keyring::Entry::new(SERVICE, key).map_err(|e| OAuthError::Storage(e.to_string()))
    }

    pub fn get(key: &str) -> Result<Option<String>, OAuthError> {
        match entry(key)?.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(OAuthError::Storage(e.to_string())),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), OAuthError> {
        entry(key)?
            .set_password(value)
            .map_err(|e| OAuthError::Storage(e.to_string()))
    }

    pub fn delete(key: &str) -> Result<(), OAuthError> {
        match entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(OAuthError::Storage(e.to_string())),
        }
    }
}
