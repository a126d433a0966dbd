//! Per-user plugin connection repository functions.
//!
//! Credentials are stored encrypted (hex, nonce-prefixed AES-GCM); the
//! store never sees plaintext tokens.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::PluginConnection;

const SELECT_COLUMNS: &str = "user_id, plugin_id, enabled, credentials, last_sync";

/// Get one connection.
///
/// # Errors
/// Returns error on database failure.
pub async fn get(
    pool: &SqlitePool,
    user_id: Uuid,
    plugin_id: &str,
) -> StoreResult<Option<PluginConnection>> {
    Ok(sqlx::query_as::<_, PluginConnection>(&format!(
        "SELECT {SELECT_COLUMNS} FROM plugin_connections WHERE user_id = ? AND plugin_id = ?"
    ))
    .bind(user_id)
    .bind(plugin_id)
    .fetch_optional(pool)
    .await?)
}

/// All connections for one user.
///
/// # Errors
/// Returns error on database failure.
pub async fn list_for_user(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<PluginConnection>> {
    Ok(sqlx::query_as::<_, PluginConnection>(&format!(
        "SELECT {SELECT_COLUMNS} FROM plugin_connections WHERE user_id = ? ORDER BY plugin_id"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Every enabled connection that has credentials (the scheduler's work list).
///
/// # Errors
/// Returns error on database failure.
pub async fn list_syncable(pool: &SqlitePool) -> StoreResult<Vec<PluginConnection>> {
    Ok(sqlx::query_as::<_, PluginConnection>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM plugin_connections
        WHERE enabled = 1 AND credentials IS NOT NULL
        ORDER BY user_id, plugin_id
        "
    ))
    .fetch_all(pool)
    .await?)
}

/// Upsert encrypted credentials, enabling the connection.
///
/// # Errors
/// Returns error on database failure.
pub async fn store_credentials(
    pool: &SqlitePool,
    user_id: Uuid,
    plugin_id: &str,
    encrypted_credentials: &str,
) -> StoreResult<()> {
    sqlx::query(
        r"
        INSERT INTO plugin_connections (user_id, plugin_id, enabled, credentials)
        VALUES (?, ?, 1, ?)
        ON CONFLICT (user_id, plugin_id)
        DO UPDATE SET credentials = excluded.credentials, enabled = 1
        ",
    )
    .bind(user_id)
    .bind(plugin_id)
    .bind(encrypted_credentials)
    .execute(pool)
    .await?;
    Ok(())
}

/// Enable or disable a connection.
///
/// # Errors
/// Returns `NotFound` if the connection does not exist.
pub async fn set_enabled(
    pool: &SqlitePool,
    user_id: Uuid,
    plugin_id: &str,
    enabled: bool,
) -> StoreResult<()> {
    let result =
        sqlx::query("UPDATE plugin_connections SET enabled = ? WHERE user_id = ? AND plugin_id = ?")
            .bind(enabled)
            .bind(user_id)
            .bind(plugin_id)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("plugin connection"));
    }
    Ok(())
}

/// Record a successful sync completion time.
///
/// # Errors
/// Returns error on database failure.
pub async fn set_last_sync(
    pool: &SqlitePool,
    user_id: Uuid,
    plugin_id: &str,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query("UPDATE plugin_connections SET last_sync = ? WHERE user_id = ? AND plugin_id = ?")
        .bind(at)
        .bind(user_id)
        .bind(plugin_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a connection entirely (disconnect).
///
/// # Errors
/// Returns error on database failure.
pub async fn delete(pool: &SqlitePool, user_id: Uuid, plugin_id: &str) -> StoreResult<()> {
    sqlx::query("DELETE FROM plugin_connections WHERE user_id = ? AND plugin_id = ?")
        .bind(user_id)
        .bind(plugin_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_pool, users};

    async fn user(pool: &SqlitePool) -> Uuid {
        users::create(
            pool,
            users::NewUser {
                username: "ada".into(),
                display_name: "Ada".into(),
                timezone: None,
                week_start: "monday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user")
        .id
    }

    #[tokio::test]
    async fn test_store_and_disable() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        store_credentials(&pool, user_id, "fitbit", "deadbeef")
            .await
            .expect("store credentials");

        let connection = get(&pool, user_id, "fitbit")
            .await
            .expect("get")
            .expect("connection exists");
        assert!(connection.enabled);
        assert_eq!(connection.credentials.as_deref(), Some("deadbeef"));

        set_enabled(&pool, user_id, "fitbit", false)
            .await
            .expect("disable");
        let syncable = list_syncable(&pool).await.expect("list syncable");
        assert!(syncable.is_empty());
    }

    #[tokio::test]
    async fn test_syncable_requires_credentials() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        store_credentials(&pool, user_id, "fitbit", "deadbeef")
            .await
            .expect("store credentials");

        let syncable = list_syncable(&pool).await.expect("list syncable");
        assert_eq!(syncable.len(), 1);
        assert_eq!(syncable[0].plugin_id, "fitbit");
    }
}
