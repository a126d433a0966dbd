//! Plugin credential types.
//!
//! OAuth tokens stored per (user, plugin) connection, with expiry helpers.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// OAuth credentials for one (user, plugin) connection.
///
/// Serialized to JSON and encrypted at rest by the store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCredentials {
    /// Access token for API calls
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: String,
    /// Access token expiry as unix seconds
    pub expires_at: i64,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Granted scopes, space separated
    pub scope: String,
}

impl PluginCredentials {
    /// Create credentials from a token response.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_seconds: i64,
        token_type: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: Utc::now().timestamp() + expires_in_seconds,
            token_type: token_type.into(),
            scope: scope.into(),
        }
    }

    /// Expiry instant as a UTC datetime.
    #[must_use]
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Check if the access token is expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    /// Check if the access token will expire within the given number of seconds.
    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        Utc::now().timestamp() + seconds >= self.expires_at
    }

    /// Seconds until expiration (0 if already expired).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now().timestamp()).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_new() {
        let creds = PluginCredentials::new("access123", "refresh456", 3600, "Bearer", "activity");

        assert_eq!(creds.access_token, "access123");
        assert_eq!(creds.refresh_token, "refresh456");
        assert_eq!(creds.token_type, "Bearer");
        assert!(!creds.is_expired());
        assert!(creds.seconds_until_expiry() > 3500);
    }

    #[test]
    fn test_credentials_expiry() {
        let mut creds = PluginCredentials::new("access", "refresh", 3600, "Bearer", "");

        assert!(!creds.is_expired());

        // Simulate expiration
        creds.expires_at = Utc::now().timestamp() - 1;
        assert!(creds.is_expired());
        assert_eq!(creds.seconds_until_expiry(), 0);
    }

    #[test]
    fn test_expires_within() {
        let creds = PluginCredentials::new("access", "refresh", 300, "Bearer", "");

        assert!(creds.expires_within(300));
        assert!(!creds.expires_within(1));
    }

    #[test]
    fn test_credentials_json_roundtrip() {
        let creds = PluginCredentials::new("a", "r", 60, "Bearer", "sleep activity");
        let json = serde_json::to_string(&creds).expect("Failed to serialize");
        assert!(json.contains("\"accessToken\""));
        let back: PluginCredentials = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back.scope, "sleep activity");
    }
}
