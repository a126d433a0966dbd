//! Fitbit data source.
//!
//! Imports daily activity and sleep totals through the Fitbit Web API
//! time-series endpoints. Requires an OAuth app registered at
//! <https://dev.fitbit.com/apps> with the callback URL shown in setup info.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use waypoint_config::ConfigResolver;
use waypoint_core::{format_duration, PluginCredentials};

use crate::oauth::{OAuthBroker, OAuthError};
use crate::plugin::{
    AdminConfigField, AdminFieldType, FetchRecord, FieldDescriptor, FieldType,
    OAuthProviderConfig, PluginError, SetupInfoEntry, SourcePlugin,
};

const AUTH_URL: &str = "https://www.fitbit.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";
const API_BASE: &str = "https://api.fitbit.com/1/user/-";

/// Fitbit plugin over the admin config.
pub struct FitbitPlugin {
    config: Arc<ConfigResolver>,
    broker: Arc<OAuthBroker>,
    http: Client,
}

impl FitbitPlugin {
    /// Build the plugin; `broker` performs its token refreshes.
    #[must_use]
    pub fn new(config: Arc<ConfigResolver>, broker: Arc<OAuthBroker>) -> Self {
        Self {
            config,
            broker,
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Time-series resource path for a field id.
    fn resource_for(field: &str) -> Option<&'static str> {
        match field {
            "steps" => Some("activities/steps"),
            "calories" => Some("activities/calories"),
            "distance" => Some("activities/distance"),
            "sleep" => Some("sleep/minutesAsleep"),
            _ => None,
        }
    }

    /// Convert a raw time-series value string into the declared field type.
    fn convert_value(field: &str, raw: &str) -> Option<Value> {
        match field {
            // Sleep minutes come back as a bare number; scripts and the
            // metrics UI expect an HH:MM duration.
            "sleep" => {
                let minutes: i64 = raw.parse().ok()?;
                Some(Value::String(format_duration(minutes)))
            }
            _ => {
                let n: f64 = raw.parse().ok()?;
                serde_json::Number::from_f64(n).map(Value::Number)
            }
        }
    }

    async fn fetch_series(
        &self,
        creds: &PluginCredentials,
        resource: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(String, String)>, PluginError> {
        let url = format!(
            "{API_BASE}/{resource}/date/{}/{}.json",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&creds.access_token)
            .send()
            .await
            .map_err(|e| PluginError::ProviderUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PluginError::AuthRevoked)
            }
            status if status.is_server_error() => {
                return Err(PluginError::ProviderUnavailable(format!(
                    "{resource} returned {status}"
                )))
            }
            status if !status.is_success() => {
                return Err(PluginError::Other(format!("{resource} returned {status}")))
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PluginError::Other(e.to_string()))?;

        // Shape: {"activities-steps": [{"dateTime": "...", "value": "..."}]}
        let key = resource.replace('/', "-");
        let entries = body
            .get(&key)
            .and_then(Value::as_array)
            .ok_or_else(|| PluginError::Other(format!("missing {key} in response")))?;

        let mut points = Vec::with_capacity(entries.len());
        for entry in entries {
            let (Some(date), Some(value)) = (
                entry.get("dateTime").and_then(Value::as_str),
                entry.get("value").and_then(Value::as_str),
            ) else {
                continue;
            };
            points.push((date.to_string(), value.to_string()));
        }
        Ok(points)
    }
}

#[async_trait]
impl SourcePlugin for FitbitPlugin {
    fn id(&self) -> &'static str {
        "fitbit"
    }

    fn name(&self) -> &'static str {
        "Fitbit"
    }

    fn description(&self) -> &'static str {
        "Imports daily steps, calories, distance, and sleep from Fitbit"
    }

    fn icon(&self) -> Option<&'static str> {
        Some("fitbit")
    }

    fn admin_config_fields(&self) -> Vec<AdminConfigField> {
        vec![
            AdminConfigField {
                key: "client_id".into(),
                label: "OAuth Client ID".into(),
                field_type: AdminFieldType::Text,
                required: true,
                description: Some("From the Fitbit developer console".into()),
                placeholder: Some("23ABCD".into()),
            },
            AdminConfigField {
                key: "client_secret".into(),
                label: "OAuth Client Secret".into(),
                field_type: AdminFieldType::Password,
                required: false,
                description: Some("Optional when the app is registered as a PKCE client".into()),
                placeholder: None,
            },
        ]
    }

    async fn setup_info(&self) -> anyhow::Result<Vec<SetupInfoEntry>> {
        let base_url = self
            .config
            .get("global.base_url")
            .await?
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        Ok(vec![
            SetupInfoEntry {
                label: "Callback URL".into(),
                value: format!("{base_url}/plugins/fitbit/callback"),
                copyable: true,
            },
            SetupInfoEntry {
                label: "Application type".into(),
                value: "Personal".into(),
                copyable: false,
            },
        ])
    }

    async fn is_configured(&self) -> bool {
        matches!(self.config.get("plugin.fitbit.client_id").await, Ok(Some(ref id)) if !id.is_empty())
    }

    async fn oauth_config(&self) -> anyhow::Result<OAuthProviderConfig> {
        let client_id = self
            .config
            .get_required("plugin.fitbit.client_id")
            .await?;
        let client_secret = self
            .config
            .get("plugin.fitbit.client_secret")
            .await?
            .filter(|secret| !secret.is_empty())
            .map(SecretString::from);
        let base_url = self
            .config
            .get("global.base_url")
            .await?
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(OAuthProviderConfig {
            client_id,
            client_secret,
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            scopes: vec!["activity".into(), "sleep".into()],
            redirect_uri: format!("{base_url}/plugins/fitbit/callback"),
            use_pkce: true,
        })
    }

    fn available_fields(&self) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                id: "steps".into(),
                name: "Steps".into(),
                description: "Total daily step count".into(),
                field_type: FieldType::Number,
                unit: Some("steps".into()),
            },
            FieldDescriptor {
                id: "calories".into(),
                name: "Calories burned".into(),
                description: "Total daily energy expenditure".into(),
                field_type: FieldType::Number,
                unit: Some("kcal".into()),
            },
            FieldDescriptor {
                id: "distance".into(),
                name: "Distance".into(),
                description: "Total daily distance".into(),
                field_type: FieldType::Number,
                unit: Some("km".into()),
            },
            FieldDescriptor {
                id: "sleep".into(),
                name: "Time asleep".into(),
                description: "Minutes asleep as an HH:MM duration".into(),
                field_type: FieldType::Time,
                unit: None,
            },
        ]
    }

    async fn validate_credentials(&self, creds: &PluginCredentials) -> anyhow::Result<bool> {
        let response = self
            .http
            .get(format!("{API_BASE}/profile.json"))
            .bearer_auth(&creds.access_token)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn refresh_tokens(
        &self,
        creds: &PluginCredentials,
    ) -> Result<PluginCredentials, OAuthError> {
        let config = self
            .oauth_config()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;
        self.broker.refresh(&config, creds).await
    }

    async fn fetch_data(
        &self,
        creds: &PluginCredentials,
        start: NaiveDate,
        end: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<FetchRecord>, PluginError> {
        let mut by_date: HashMap<String, HashMap<String, Value>> = HashMap::new();

        for field in fields {
            let Some(resource) = Self::resource_for(field) else {
                continue;
            };
            let points = self.fetch_series(creds, resource, start, end).await?;
            debug!(field = %field, points = points.len(), "Fetched Fitbit series");

            for (date, raw) in points {
                if let Some(value) = Self::convert_value(field, &raw) {
                    by_date.entry(date).or_default().insert(field.clone(), value);
                }
            }
        }

        Ok(by_date
            .into_iter()
            .map(|(date, fields)| FetchRecord { date, fields })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_mapping() {
        assert_eq!(FitbitPlugin::resource_for("steps"), Some("activities/steps"));
        assert_eq!(FitbitPlugin::resource_for("sleep"), Some("sleep/minutesAsleep"));
        assert_eq!(FitbitPlugin::resource_for("unknown"), None);
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            FitbitPlugin::convert_value("steps", "10234"),
            Some(serde_json::json!(10234.0))
        );
        assert_eq!(
            FitbitPlugin::convert_value("sleep", "450"),
            Some(serde_json::json!("07:30"))
        );
        assert_eq!(FitbitPlugin::convert_value("steps", "not-a-number"), None);
    }
}
