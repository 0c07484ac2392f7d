//! Core error types for taskbridge-core.
//!
//! The hierarchy mirrors the layers of the crate: configuration, the local
//! store collaborator, the OAuth flow, and the sync pass itself
//! ([`crate::sync::SyncError`]).

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Core error type for taskbridge-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// OAuth-related errors
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Sync pass errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Could not resolve the data directory
    #[error("Could not determine data directory: {0}")]
    DataDir(String),
}

/// Errors raised by a [`crate::storage::LocalStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record the caller referenced does not exist.
    #[error("{kind} '{id}' not found in local store")]
    NotFound { kind: &'static str, id: String },

    /// The store's internal lock was poisoned by a panicking writer.
    #[error("Local store lock poisoned")]
    Poisoned,

    /// Failed to read or write the backing file
    #[error("Local store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a valid snapshot
    #[error("Local store snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// OAuth-specific errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Authorization failed
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Token refresh failed
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// The token endpoint refused the grant; the refresh token is revoked or invalid
    #[error("Token grant rejected: {0}")]
    GrantRejected(String),

    /// The token endpoint was unreachable or answered without an OAuth error body
    #[error("Token endpoint unavailable: {message}")]
    TokenEndpointUnavailable { status: Option<u16>, message: String },

    /// Callback timeout
    #[error("OAuth callback timeout: no callback received within {timeout_secs} seconds")]
    CallbackTimeout { timeout_secs: u64 },

    /// Callback state did not match the state we generated
    #[error("OAuth state mismatch or missing; the callback was not issued for this request")]
    InvalidState,

    /// Invalid callback
    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),

    /// Not authenticated
    #[error("Not authenticated with {service}")]
    NotAuthenticated { service: String },

    /// Credentials not configured
    #[error("OAuth credentials not configured for {service}")]
    CredentialsNotConfigured { service: String },

    /// The secure credential store failed
    #[error("Credential store error: {0}")]
    Storage(String),

    /// IO errors while serving the localhost callback
    #[error("OAuth IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::time::error::Elapsed> for OAuthError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        OAuthError::CallbackTimeout {
            timeout_secs: crate::integrations::oauth::CALLBACK_TIMEOUT_SECS,
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
