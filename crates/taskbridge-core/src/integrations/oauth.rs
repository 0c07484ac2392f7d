//! OAuth2 Authorization Code flow with PKCE for desktop apps.
//!
//! 1. Generates a PKCE verifier/challenge and a CSRF state
//! 2. Opens browser to authorization URL
//! 3. Serves a tiny localhost HTTP endpoint to receive the callback
//! 4. Validates the state and exchanges the code (+ verifier) for tokens
//! 5. Hands the tokens to a [`CredentialStore`]

use std::fmt;
use std::time::Duration;

use base64::prelude::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::credentials::CredentialStore;
use crate::error::OAuthError;
use crate::storage::GoogleConfig;

/// How long [`authorize`] waits for the browser to come back.
pub const CALLBACK_TIMEOUT_SECS: u64 = 300;

const GOOGLE_TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

impl OAuthTokens {
    /// True when the token expires within `skew_secs` of `now` (Unix seconds).
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, now: i64, skew_secs: i64) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp - skew_secs,
            None => false,
        }
    }
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    /// `previous_refresh` is kept when the server does not rotate it.
    fn into_tokens(
        self,
        now: i64,
        previous_refresh: Option<&str>,
    ) -> Result<OAuthTokens, String> {
        if let Some(error) = self.error {
            return Err(match self.error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error,
            });
        }
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "response carried no access_token".to_string())?;
        Ok(OAuthTokens {
            access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(String::from)),
            expires_at: self.expires_in.map(|ei| now + ei),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
}

impl OAuthConfig {
    /// Google Tasks client built from the `[google]` config section.
    pub fn google_tasks(google: &GoogleConfig) -> Result<Self, OAuthError> {
        if google.client_id.trim().is_empty() || google.client_secret.trim().is_empty() {
            return Err(OAuthError::CredentialsNotConfigured {
                service: "google_tasks".into(),
            });
        }
        Ok(Self {
            client_id: google.client_id.clone(),
            client_secret: google.client_secret.clone(),
            auth_url: google.auth_url.clone(),
            token_url: google.token_url.clone(),
            scopes: vec![GOOGLE_TASKS_SCOPE.to_string()],
            redirect_port: google.redirect_port,
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    /// Browser URL for the consent screen, bound to `pkce`.
    pub fn authorization_url(&self, pkce: &PkceChallenge) -> Result<String, OAuthError> {
        let scopes = self.scopes.join(" ");
        let redirect = self.redirect_uri();
        let url = url::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect.as_str()),
                ("response_type", "code"),
                ("scope", scopes.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("code_challenge", pkce.code_challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", pkce.state.as_str()),
            ],
        )
        .map_err(|e| OAuthError::AuthorizationFailed(format!("bad auth_url: {e}")))?;
        Ok(url.into())
    }
}

/// One authorization attempt's secrets.
#[derive(Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("code_challenge", &self.code_challenge)
            .finish_non_exhaustive()
    }
}

impl PkceChallenge {
    pub fn generate() -> Result<Self, OAuthError> {
        let code_verifier = random_token()?;
        let code_challenge = s256_challenge(&code_verifier);
        let state = random_token()?;
        Ok(Self {
            code_verifier,
            code_challenge,
            state,
        })
    }
}

/// `BASE64URL-NOPAD(SHA256(verifier))`.
pub fn s256_challenge(verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// 32 random bytes, base64url without padding (43 chars).
fn random_token() -> Result<String, OAuthError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| OAuthError::AuthorizationFailed(format!("no randomness: {e}")))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Check a callback query string and pull out the authorization code.
///
/// The state is checked before anything else, so a forged callback is
/// rejected even if it carries an error or a code.
pub fn validate_callback(query: &str, expected_state: &str) -> Result<String, OAuthError> {
    let mut state = None;
    let mut code = None;
    let mut error = None;
    let mut error_description = None;
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        match k.as_ref() {
            "state" => state = Some(v.into_owned()),
            "code" => code = Some(v.into_owned()),
            "error" => error = Some(v.into_owned()),
            "error_description" => error_description = Some(v.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) || expected_state.is_empty() {
        return Err(OAuthError::InvalidState);
    }
    if let Some(err) = error {
        return Err(OAuthError::InvalidCallback(error_description.unwrap_or(err)));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| OAuthError::InvalidCallback("missing code".into()))
}

/// Run the full flow: open browser -> wait for callback -> exchange -> store.
pub async fn authorize(
    config: &OAuthConfig,
    store: &dyn CredentialStore,
) -> Result<OAuthTokens, OAuthError> {
    let pkce = PkceChallenge::generate()?;
    let auth_url = config.authorization_url(&pkce)?;

    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port)).await?;
    tracing::info!(port = config.redirect_port, "waiting for OAuth callback");
    if let Err(e) = open::that(&auth_url) {
        tracing::warn!(error = %e, "could not open browser; visit the URL manually");
        eprintln!("Open this URL to continue:\n{auth_url}");
    }

    let code = tokio::time::timeout(
        Duration::from_secs(CALLBACK_TIMEOUT_SECS),
        wait_for_callback(&listener, &pkce.state),
    )
    .await??;
    drop(listener);

    let tokens = exchange_code(config, &code, &pkce.code_verifier).await?;
    store.save(&tokens)?;
    tracing::info!("OAuth sign-in complete");
    Ok(tokens)
}

async fn wait_for_callback(listener: &TcpListener, expected_state: &str) -> Result<String, OAuthError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            continue;
        }
        let request = String::from_utf8_lossy(&buf[..n]);
        let target = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or_default();
        let Ok(parsed) = url::Url::parse(&format!("http://localhost{target}")) else {
            respond(&mut stream, "400 Bad Request", "Malformed request.").await;
            continue;
        };
        if parsed.path() != "/callback" {
            respond(&mut stream, "404 Not Found", "Callback endpoint not found.").await;
            continue;
        }

        let result = validate_callback(parsed.query().unwrap_or_default(), expected_state);
        match &result {
            Ok(_) => {
                respond(
                    &mut stream,
                    "200 OK",
                    "Authentication successful! You can close this tab.",
                )
                .await
            }
            Err(e) => respond(&mut stream, "400 Bad Request", &e.to_string()).await,
        }
        return result;
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, status: &str, message: &str) {
    let body = format!("<html><body><h2>{message}</h2></body></html>");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    // The browser going away is not our problem.
    let _ = stream.write_all(response.as_bytes()).await;
}

/// Exchange authorization code (plus PKCE verifier) for tokens.
pub async fn exchange_code(
    config: &OAuthConfig,
    code: &str,
    code_verifier: &str,
) -> Result<OAuthTokens, OAuthError> {
    let redirect = config.redirect_uri();
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("code", code),
        ("code_verifier", code_verifier),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect.as_str()),
    ];
    let body = post_token_form(&config.token_url, &params)
        .await
        .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;
    body.into_tokens(chrono::Utc::now().timestamp(), None)
        .map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token. The old refresh token is kept unless the
/// server issues a new one.
///
/// Only an OAuth error answer maps to [`OAuthError::GrantRejected`]; transport
/// failures, 5xx and unparseable answers come back as
/// [`OAuthError::TokenEndpointUnavailable`] so callers can keep the grant.
pub async fn refresh_token(config: &OAuthConfig, refresh: &str) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];
    let body = post_token_form(&config.token_url, &params)
        .await
        .map_err(|e| match e {
            TokenEndpointError::Rejected(reason) => OAuthError::GrantRejected(reason),
            TokenEndpointError::Unavailable { status, message } => {
                OAuthError::TokenEndpointUnavailable { status, message }
            }
        })?;
    body.into_tokens(chrono::Utc::now().timestamp(), Some(refresh))
        .map_err(OAuthError::TokenRefreshFailed)
}

#[derive(Debug)]
enum TokenEndpointError {
    /// The server answered with an OAuth `error` body.
    Rejected(String),
    Unavailable { status: Option<u16>, message: String },
}

impl fmt::Display for TokenEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenEndpointError::Rejected(reason) => f.write_str(reason),
            TokenEndpointError::Unavailable { message, .. } => f.write_str(message),
        }
    }
}

async fn post_token_form(
    url: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, TokenEndpointError> {
    let resp = Client::new()
        .post(url)
        .form(params)
        .send()
        .await
        .map_err(|e| TokenEndpointError::Unavailable {
            status: None,
            message: e.to_string(),
        })?;
    let status = resp.status();
    if status.is_server_error() {
        return Err(TokenEndpointError::Unavailable {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
        });
    }
    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| TokenEndpointError::Unavailable {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}: {e}"),
        })?;
    if status.is_success() {
        return Ok(body);
    }
    match body.error {
        Some(error) => Err(TokenEndpointError::Rejected(match body.error_description {
            Some(desc) => format!("{error}: {desc}"),
            None => error,
        })),
        None => Err(TokenEndpointError::Unavailable {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}"),
        }),
    }
}
