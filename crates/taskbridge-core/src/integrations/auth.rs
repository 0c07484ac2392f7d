//! Credential provider: hands out valid access tokens, refreshing as needed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use super::credentials::CredentialStore;
use super::oauth::{self, OAuthConfig, OAuthTokens};
use crate::error::OAuthError;
use crate::sync::SyncError;

/// Tokens are treated as expired this many seconds before their real expiry.
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// Anything that can produce a bearer token for the remote service.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A currently valid access token, or `AuthRequired`.
    async fn current_token(&self) -> Result<String, SyncError>;
}

pub struct CredentialProvider {
    config: OAuthConfig,
    store: Arc<dyn CredentialStore>,
    signed_in: watch::Sender<bool>,
    // Serializes refreshes so parallel list workers do not race the token endpoint.
    refresh_lock: Mutex<()>,
}

impl CredentialProvider {
    pub fn new(config: OAuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        let initially = matches!(store.load(), Ok(Some(_)));
        let (signed_in, _) = watch::channel(initially);
        Self {
            config,
            store,
            signed_in,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.store.load(), Ok(Some(_)))
    }

    /// Sign-in state changes. The current value is available immediately.
    pub fn subscribe_sign_in(&self) -> watch::Receiver<bool> {
        self.signed_in.subscribe()
    }

    /// Run the interactive browser flow and store the result.
    pub async fn sign_in(&self) -> Result<(), OAuthError> {
        let tokens = oauth::authorize(&self.config, self.store.as_ref()).await?;
        self.store_tokens(&tokens)
    }

    /// Persist tokens obtained elsewhere and announce the sign-in.
    pub fn store_tokens(&self, tokens: &OAuthTokens) -> Result<(), OAuthError> {
        self.store.save(tokens)?;
        self.publish(true);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), OAuthError> {
        self.store.clear()?;
        self.publish(false);
        tracing::info!("signed out");
        Ok(())
    }

    fn publish(&self, value: bool) {
        self.signed_in.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Drop stored tokens after an unrecoverable refresh problem.
    fn forget(&self, reason: &str) -> SyncError {
        tracing::warn!(reason, "clearing stored credentials; sign-in required");
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored credentials");
        }
        self.publish(false);
        SyncError::AuthRequired
    }
}

#[async_trait]
impl TokenSource for CredentialProvider {
    async fn current_token(&self) -> Result<String, SyncError> {
        let _guard = self.refresh_lock.lock().await;

        let tokens = match self.store.load() {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return Err(SyncError::AuthRequired),
            Err(e) => {
                tracing::warn!(error = %e, "credential store unavailable");
                return Err(SyncError::AuthRequired);
            }
        };

        let now = chrono::Utc::now().timestamp();
        if !tokens.expires_within(now, EXPIRY_SKEW_SECS) {
            return Ok(tokens.access_token);
        }

        let Some(refresh) = tokens.refresh_token.as_deref() else {
            return Err(self.forget("access token expired and no refresh token is stored"));
        };

        tracing::debug!("access token near expiry, refreshing");
        match oauth::refresh_token(&self.config, refresh).await {
            Ok(fresh) => {
                if let Err(e) = self.store.save(&fresh) {
                    tracing::warn!(error = %e, "could not persist refreshed tokens");
                }
                Ok(fresh.access_token)
            }
            Err(OAuthError::GrantRejected(reason)) => Err(self.forget(&reason)),
            Err(OAuthError::TokenEndpointUnavailable {
                status: Some(code),
                message,
            }) if code >= 500 => {
                tracing::warn!(status = code, %message, "token endpoint failed; keeping credentials");
                Err(SyncError::ServerError(code))
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed; keeping credentials");
                Err(SyncError::Network(e.to_string()))
            }
        }
    }
}
