//! Two-tier configuration resolution.
//!
//! Lookup order: in-memory cache, `config_entries` database rows, then a
//! fixed environment-variable fallback. Writes go to the database and
//! invalidate the cache.

use std::time::Duration;

use anyhow::{Context, Result};
use moka::future::Cache;
use sqlx::SqlitePool;
use tracing::debug;

/// One database-backed configuration row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    /// Namespaced key, e.g. `global.base_url` or `plugin.fitbit.client_id`
    pub key: String,
    /// Stored value
    pub value: String,
    /// Secret values are redacted for non-admin readers
    pub is_secret: bool,
}

/// Placeholder shown instead of secret values.
const REDACTED: &str = "********";

/// Resolves configuration keys through cache, database, and environment.
#[derive(Clone)]
pub struct ConfigResolver {
    pool: SqlitePool,
    cache: Cache<String, Option<String>>,
}

impl ConfigResolver {
    /// Create a resolver over the given pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Cache::builder()
                .max_capacity(500)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    /// Resolve a key: database row first, environment fallback second.
    ///
    /// # Errors
    ///
    /// Returns an error only on database failure; an absent key is `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.get(key).await {
            return Ok(cached);
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read config entry")?;

        let resolved = match row {
            Some((value,)) => Some(value),
            None => env_fallback(key),
        };

        self.cache.insert(key.to_string(), resolved.clone()).await;
        Ok(resolved)
    }

    /// Resolve a key that must be present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key resolves to nothing.
    pub async fn get_required(&self, key: &str) -> Result<String> {
        self.get(key)
            .await?
            .with_context(|| format!("Missing required config key: {key}"))
    }

    /// All database-backed entries.
    ///
    /// Secret values are replaced with a placeholder unless the caller holds
    /// admin capability.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_all(&self, include_secrets: bool) -> Result<Vec<ConfigEntry>> {
        let mut entries: Vec<ConfigEntry> =
            sqlx::query_as("SELECT key, value, is_secret FROM config_entries ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .context("Failed to list config entries")?;

        if !include_secrets {
            for entry in &mut entries {
                if entry.is_secret {
                    entry.value = REDACTED.to_string();
                }
            }
        }

        Ok(entries)
    }

    /// Upsert several entries in one transaction and invalidate the cache.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure; no entry is written on failure.
    pub async fn put_many(&self, entries: &[ConfigEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        for entry in entries {
            sqlx::query(
                r"
                INSERT INTO config_entries (key, value, is_secret)
                VALUES (?, ?, ?)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value, is_secret = excluded.is_secret
                ",
            )
            .bind(&entry.key)
            .bind(&entry.value)
            .bind(entry.is_secret)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert config key {}", entry.key))?;
        }

        tx.commit().await.context("Failed to commit config write")?;

        for entry in entries {
            self.cache.invalidate(&entry.key).await;
        }

        debug!(count = entries.len(), "Wrote config entries");
        Ok(())
    }
}

/// Map a config key to its environment-variable fallback.
///
/// Only the documented keys have fallbacks; everything else resolves to
/// database rows alone.
fn env_fallback(key: &str) -> Option<String> {
    let env_name = env_name_for(key)?;
    std::env::var(env_name).ok()
}

fn env_name_for(key: &str) -> Option<String> {
    match key {
        "global.database_path" => Some("DATABASE_PATH".to_string()),
        "global.base_url" => Some("PUBLIC_BASE_URL".to_string()),
        "global.admin_username" => Some("ADMIN_USERNAME".to_string()),
        _ => {
            // plugin.<id>.<field> -> PLUGIN_<ID>_<FIELD>
            let rest = key.strip_prefix("plugin.")?;
            let (plugin_id, field) = rest.split_once('.')?;
            if plugin_id.is_empty() || field.is_empty() {
                return None;
            }
            Some(format!(
                "PLUGIN_{}_{}",
                plugin_id.to_uppercase().replace('-', "_"),
                field.to_uppercase()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        // One connection: every sqlite :memory: connection is its own database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        sqlx::query(
            r"
            CREATE TABLE config_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                is_secret INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&pool)
        .await
        .expect("Failed to create config table");
        pool
    }

    fn entry(key: &str, value: &str, is_secret: bool) -> ConfigEntry {
        ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
            is_secret,
        }
    }

    #[test]
    fn test_env_name_mapping() {
        assert_eq!(
            env_name_for("global.base_url").as_deref(),
            Some("PUBLIC_BASE_URL")
        );
        assert_eq!(
            env_name_for("plugin.fitbit.client_id").as_deref(),
            Some("PLUGIN_FITBIT_CLIENT_ID")
        );
        assert_eq!(
            env_name_for("plugin.fitbit.client_secret").as_deref(),
            Some("PLUGIN_FITBIT_CLIENT_SECRET")
        );
        assert_eq!(env_name_for("unknown.key"), None);
        assert_eq!(env_name_for("plugin.only"), None);
    }

    #[tokio::test]
    async fn test_get_prefers_database_row() {
        let resolver = ConfigResolver::new(test_pool().await);
        resolver
            .put_many(&[entry("global.base_url", "https://waypoint.example", false)])
            .await
            .expect("put_many failed");

        let value = resolver.get("global.base_url").await.expect("get failed");
        assert_eq!(value.as_deref(), Some("https://waypoint.example"));
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let resolver = ConfigResolver::new(test_pool().await);
        let value = resolver.get("plugin.fitbit.client_id").await.expect("get failed");
        // No DB row; env fallback may or may not be set in the test
        // environment, so just check the call succeeds.
        let _ = value;

        let missing = resolver.get("nothing.here").await.expect("get failed");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_put_many_overwrites_and_invalidates() {
        let resolver = ConfigResolver::new(test_pool().await);

        resolver
            .put_many(&[entry("global.admin_username", "ada", false)])
            .await
            .expect("first write failed");
        assert_eq!(
            resolver.get("global.admin_username").await.expect("get failed").as_deref(),
            Some("ada")
        );

        resolver
            .put_many(&[entry("global.admin_username", "grace", false)])
            .await
            .expect("second write failed");
        assert_eq!(
            resolver.get("global.admin_username").await.expect("get failed").as_deref(),
            Some("grace")
        );
    }

    #[tokio::test]
    async fn test_secret_redaction() {
        let resolver = ConfigResolver::new(test_pool().await);
        resolver
            .put_many(&[
                entry("plugin.fitbit.client_id", "public-id", false),
                entry("plugin.fitbit.client_secret", "hunter2", true),
            ])
            .await
            .expect("put_many failed");

        let redacted = resolver.get_all(false).await.expect("get_all failed");
        let secret = redacted
            .iter()
            .find(|e| e.key == "plugin.fitbit.client_secret")
            .expect("secret entry present");
        assert_eq!(secret.value, REDACTED);

        let full = resolver.get_all(true).await.expect("get_all failed");
        let secret = full
            .iter()
            .find(|e| e.key == "plugin.fitbit.client_secret")
            .expect("secret entry present");
        assert_eq!(secret.value, "hunter2");
    }
}
