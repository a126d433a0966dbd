//! OAuth 2.0 authorization-code broker with PKCE.
//!
//! Owns the process-local pending-auth store (state -> user + verifier,
//! 10-minute TTL) and the HTTP legs of the flow: building the
//! authorization URL, exchanging the callback code, and refreshing tokens.
//! Losing the pending store on restart is acceptable; in-flight flows fail
//! and the user retries.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::{ApiError, ExternalErrorKind, PluginCredentials};

use crate::pkce::{generate_state, PkceChallenge};
use crate::plugin::OAuthProviderConfig;

/// Pending-auth entry lifetime.
const PENDING_TTL_SECONDS: i64 = 600;

/// Per-request timeout for provider calls.
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Broker-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OAuthError {
    /// State missing, already consumed, or expired
    #[error("authorization state is invalid or expired")]
    InvalidState,
    /// Provider rejected the code exchange
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    /// Provider rejected the refresh token (permanent; disables the plugin)
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// 5xx or network trouble (retried by the scheduler)
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl OAuthError {
    /// The taxonomy kind for API surfaces.
    #[must_use]
    pub const fn kind(&self) -> ExternalErrorKind {
        match self {
            Self::InvalidState => ExternalErrorKind::OAuthInvalidState,
            Self::TokenExchangeFailed(_) => ExternalErrorKind::TokenExchangeFailed,
            Self::RefreshFailed(_) => ExternalErrorKind::RefreshFailed,
            Self::ProviderUnavailable(_) => ExternalErrorKind::ProviderUnavailable,
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        Self::external(err.kind(), err.to_string())
    }
}

/// One in-flight authorization, keyed by its state parameter.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub user_id: Uuid,
    pub plugin_id: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

impl PendingAuth {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(PENDING_TTL_SECONDS)
    }
}

/// Token endpoint response shape (RFC 6749 §5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The authorization flow broker.
pub struct OAuthBroker {
    http: Client,
    pending: RwLock<HashMap<String, PendingAuth>>,
}

impl Default for OAuthBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthBroker {
    /// Create a broker with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Begin a flow: mint state + verifier, remember them, and build the
    /// authorization URL to redirect the user to.
    ///
    /// Returns `(authorization_url, state)`; the caller also sets the state
    /// in a cookie so the callback can compare the two copies.
    #[must_use]
    pub fn begin(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        config: &OAuthProviderConfig,
    ) -> (String, String) {
        let pkce = PkceChallenge::generate();
        let state = generate_state();

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            config.auth_url,
            urlencoding::encode(&config.client_id),
            urlencoding::encode(&config.redirect_uri),
            urlencoding::encode(&config.scopes.join(" ")),
            urlencoding::encode(&state),
        );
        if config.use_pkce {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method={}",
                urlencoding::encode(&pkce.challenge),
                PkceChallenge::method(),
            ));
        }

        self.pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                state.clone(),
                PendingAuth {
                    user_id,
                    plugin_id: plugin_id.to_string(),
                    code_verifier: pkce.verifier,
                    created_at: Utc::now(),
                },
            );

        debug!(plugin = plugin_id, user_id = %user_id, "Started authorization flow");
        (url, state)
    }

    /// Consume the pending entry for a state, enforcing the TTL.
    ///
    /// # Errors
    /// `InvalidState` when missing, already consumed, or expired.
    pub fn take_pending(&self, state: &str) -> Result<PendingAuth, OAuthError> {
        let mut pending = self
            .pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = pending.remove(state).ok_or(OAuthError::InvalidState)?;
        if entry.is_expired(Utc::now()) {
            return Err(OAuthError::InvalidState);
        }
        Ok(entry)
    }

    /// Drop expired pending entries (called from the scheduler tick).
    pub fn sweep_pending(&self) {
        let now = Utc::now();
        let mut pending = self
            .pending
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = pending.len();
        pending.retain(|_, entry| !entry.is_expired(now));
        let removed = before - pending.len();
        if removed > 0 {
            debug!(removed, "Swept expired pending authorizations");
        }
    }

    /// Number of pending flows (diagnostics).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Exchange a callback code for credentials.
    ///
    /// # Errors
    /// `TokenExchangeFailed` on 4xx, `ProviderUnavailable` on 5xx/network.
    pub async fn exchange_code(
        &self,
        config: &OAuthProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<PluginCredentials, OAuthError> {
        info!("Exchanging authorization code for tokens");

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("client_id", &config.client_id),
            ("code", code),
            ("redirect_uri", &config.redirect_uri),
        ];
        let secret;
        if let Some(ref client_secret) = config.client_secret {
            secret = client_secret.expose_secret().clone();
            params.push(("client_secret", &secret));
        }
        if config.use_pkce {
            params.push(("code_verifier", code_verifier));
        }

        let response = self
            .http
            .post(&config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(OAuthError::ProviderUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token exchange rejected");
            return Err(OAuthError::TokenExchangeFailed(format!("{status}: {body}")));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;

        info!(
            expires_in = tokens.expires_in,
            has_refresh = tokens.refresh_token.is_some(),
            "Obtained tokens"
        );
        Ok(credentials_from(tokens, None))
    }

    /// Refresh credentials with the provider.
    ///
    /// # Errors
    /// `RefreshFailed` on 4xx (permanent), `ProviderUnavailable` on
    /// 5xx/network (retriable).
    pub async fn refresh(
        &self,
        config: &OAuthProviderConfig,
        creds: &PluginCredentials,
    ) -> Result<PluginCredentials, OAuthError> {
        info!("Refreshing access token");

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("client_id", &config.client_id),
            ("refresh_token", &creds.refresh_token),
        ];
        let secret;
        if let Some(ref client_secret) = config.client_secret {
            secret = client_secret.expose_secret().clone();
            params.push(("client_secret", &secret));
        }

        let response = self
            .http
            .post(&config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(OAuthError::ProviderUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token refresh rejected");
            return Err(OAuthError::RefreshFailed(format!("{status}: {body}")));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;

        Ok(credentials_from(tokens, Some(creds)))
    }
}

/// Build stored credentials from a token response, keeping the previous
/// refresh token when the provider rotates nothing.
fn credentials_from(tokens: TokenResponse, previous: Option<&PluginCredentials>) -> PluginCredentials {
    let refresh_token = tokens
        .refresh_token
        .or_else(|| previous.map(|p| p.refresh_token.clone()))
        .unwrap_or_default();
    PluginCredentials::new(
        tokens.access_token,
        refresh_token,
        tokens.expires_in,
        tokens.token_type.unwrap_or_else(|| "Bearer".to_string()),
        tokens
            .scope
            .or_else(|| previous.map(|p| p.scope.clone()))
            .unwrap_or_default(),
    )
}
