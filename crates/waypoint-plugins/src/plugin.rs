//! The plugin capability set.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::warn;

use waypoint_core::PluginCredentials;

use crate::oauth::OAuthError;

/// Widget kind for an admin config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminFieldType {
    Text,
    Password,
    Url,
}

/// One admin-editable configuration field of a plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfigField {
    /// Config key suffix under `plugin.<id>.`
    pub key: String,
    pub label: String,
    pub field_type: AdminFieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// One line of setup guidance shown in the admin UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupInfoEntry {
    pub label: String,
    pub value: String,
    pub copyable: bool,
}

/// Value type of an importable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Time,
    Text,
    Boolean,
}

/// One field a plugin can import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Stable id; metric names are `<pluginId>.<id>`
    pub id: String,
    pub name: String,
    pub description: String,
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// OAuth endpoints and client settings for one provider.
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub use_pkce: bool,
}

/// One day of fetched values as the provider returned them.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    /// Must be `YYYY-MM-DD`; anything else is dropped during sanitizing
    pub date: String,
    /// Field id -> value
    pub fields: HashMap<String, serde_json::Value>,
}

/// A fetch record after date parsing and unknown-field filtering.
#[derive(Debug, Clone)]
pub struct CleanRecord {
    pub date: NaiveDate,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Errors out of a plugin data fetch.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Token is no longer accepted; the sync layer disables the connection
    #[error("authorization expired or revoked")]
    AuthRevoked,
    /// 5xx or network trouble; the scheduler retries on a later tick
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Anything else (malformed payloads, unexpected shapes)
    #[error("{0}")]
    Other(String),
}

/// A compile-time-registered external data source.
///
/// Implementations read their admin settings through the config resolver
/// they were constructed with; per-user credentials always arrive as
/// arguments.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Stable plugin id, used in metric names and config keys.
    fn id(&self) -> &'static str;

    /// Display name.
    fn name(&self) -> &'static str;

    /// Short description for the settings UI.
    fn description(&self) -> &'static str;

    /// Optional icon slug.
    fn icon(&self) -> Option<&'static str> {
        None
    }

    /// Admin-editable configuration fields.
    fn admin_config_fields(&self) -> Vec<AdminConfigField>;

    /// Setup guidance derived from the current configuration (e.g. the
    /// callback URL to paste into the provider console).
    async fn setup_info(&self) -> anyhow::Result<Vec<SetupInfoEntry>>;

    /// Whether the admin configuration is complete enough to start OAuth.
    async fn is_configured(&self) -> bool;

    /// OAuth endpoints and client settings.
    ///
    /// # Errors
    /// Returns an error when required configuration is missing.
    async fn oauth_config(&self) -> anyhow::Result<OAuthProviderConfig>;

    /// The fields this plugin can import.
    fn available_fields(&self) -> Vec<FieldDescriptor>;

    /// Cheap credential probe (used by settings surfaces).
    async fn validate_credentials(&self, creds: &PluginCredentials) -> anyhow::Result<bool>;

    /// Exchange the refresh token for fresh credentials.
    async fn refresh_tokens(
        &self,
        creds: &PluginCredentials,
    ) -> Result<PluginCredentials, OAuthError>;

    /// Fetch values for the inclusive date range, limited to `fields`.
    async fn fetch_data(
        &self,
        creds: &PluginCredentials,
        start: NaiveDate,
        end: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<FetchRecord>, PluginError>;
}

/// Enforce the fetch contract: dates must parse and field ids must be
/// declared by the plugin. Violations are dropped with a warning, never
/// imported.
#[must_use]
pub fn sanitize_records(plugin: &dyn SourcePlugin, records: Vec<FetchRecord>) -> Vec<CleanRecord> {
    let declared: std::collections::HashSet<String> = plugin
        .available_fields()
        .into_iter()
        .map(|field| field.id)
        .collect();

    let mut clean = Vec::with_capacity(records.len());
    for record in records {
        let Ok(date) = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d") else {
            warn!(plugin = plugin.id(), date = %record.date, "Dropping record with bad date");
            continue;
        };
        let mut fields = HashMap::new();
        for (id, value) in record.fields {
            if declared.contains(&id) {
                fields.insert(id, value);
            } else {
                warn!(plugin = plugin.id(), field = %id, "Dropping undeclared field");
            }
        }
        if !fields.is_empty() {
            clean.push(CleanRecord { date, fields });
        }
    }
    clean
}


#[cfg(test)]
mod tests {
    use super::test_support::MockPlugin;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_drops_bad_dates_and_unknown_fields() {
        let plugin = MockPlugin::new();
        let records = vec![
            FetchRecord {
                date: "2025-03-14".into(),
                fields: [
                    ("steps".to_string(), json!(10234)),
                    ("undeclared".to_string(), json!(1)),
                ]
                .into_iter()
                .collect(),
            },
            FetchRecord {
                date: "14/03/2025".into(),
                fields: [("steps".to_string(), json!(500))].into_iter().collect(),
            },
        ];

        let clean = sanitize_records(&plugin, records);
        assert_eq!(clean.len(), 1);
        assert_eq!(
            clean[0].date,
            NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date")
        );
        assert_eq!(clean[0].fields.len(), 1);
        assert_eq!(clean[0].fields["steps"], json!(10234));
    }

    #[test]
    fn test_records_with_only_unknown_fields_vanish() {
        let plugin = MockPlugin::new();
        let records = vec![FetchRecord {
            date: "2025-03-14".into(),
            fields: [("mystery".to_string(), json!(1))].into_iter().collect(),
        }];
        assert!(sanitize_records(&plugin, records).is_empty());
    }
}
