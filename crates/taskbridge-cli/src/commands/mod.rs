pub mod auth;
pub mod config;
pub mod sync;

use std::sync::Arc;

use taskbridge_core::{Config, CredentialProvider, KeyringCredentialStore, OAuthConfig};

/// Credential provider backed by the OS keyring, configured from `config`.
pub fn credential_provider(
    config: &Config,
) -> Result<Arc<CredentialProvider>, Box<dyn std::error::Error>> {
    let oauth = OAuthConfig::google_tasks(&config.google)?;
    Ok(Arc::new(CredentialProvider::new(
        oauth,
        Arc::new(KeyringCredentialStore::default()),
    )))
}
