//! # Waypoint Store
//!
//! SQLite persistence for the Waypoint goal tracker. Repository modules are
//! free async functions over `&SqlitePool`; row types live in [`types`].
//!
//! All user-owned rows cascade on user deletion. Unique-constraint
//! violations surface as [`StoreError::Conflict`], missing rows as
//! [`StoreError::NotFound`].

pub mod error;
pub mod export;
pub mod types;

pub mod execution_log;
pub mod metric_values;
pub mod objectives;
pub mod periods;
pub mod plugins;
pub mod queries;
pub mod reflections;
pub mod tags;
pub mod tasks;
pub mod templates;
pub mod users;
pub mod widgets;

pub use error::StoreError;
pub use execution_log::NewExecutionLog;
pub use export::ExportDocument;
pub use objectives::{NewKeyResult, NewObjective};
pub use queries::MAX_CODE_BYTES;
pub use tasks::{NewTask, TaskFilter};
pub use types::*;
pub use users::NewUser;
pub use widgets::NewWidget;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open (creating if absent) the database and run pending migrations.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a migration fails.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .context("Invalid database URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Run pending migrations on an existing pool.
///
/// # Errors
///
/// Returns an error if a migration fails.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(())
}

/// In-memory database with the full schema, for tests.
#[cfg(any(test, feature = "test-support"))]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid memory URL")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to open in-memory database");
    migrate(&pool).await.expect("Failed to migrate test database");
    pool
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_migrations_apply_cleanly() {
        let pool = super::test_pool().await;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .expect("users table exists");
        assert_eq!(count, 0);
    }
}
