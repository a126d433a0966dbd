//! Reflection and principle repository functions.
//!
//! Peripheral per-user rows; kept mainly so export/import covers the whole
//! profile.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{Principle, Reflection};

/// Upsert the reflection for a period (one per period).
///
/// # Errors
/// Returns error on database failure.
pub async fn upsert_reflection(
    pool: &SqlitePool,
    user_id: Uuid,
    period_id: Uuid,
    content: &str,
) -> StoreResult<Reflection> {
    let existing: Option<Reflection> = sqlx::query_as(
        "SELECT id, user_id, period_id, content, created_at, updated_at FROM reflections WHERE period_id = ?",
    )
    .bind(period_id)
    .fetch_optional(pool)
    .await?;

    let now = Utc::now();
    let id = match existing {
        Some(reflection) => {
            sqlx::query("UPDATE reflections SET content = ?, updated_at = ? WHERE id = ?")
                .bind(content)
                .bind(now)
                .bind(reflection.id)
                .execute(pool)
                .await?;
            reflection.id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                r"
                INSERT INTO reflections (id, user_id, period_id, content, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(id)
            .bind(user_id)
            .bind(period_id)
            .bind(content)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            id
        }
    };

    sqlx::query_as::<_, Reflection>(
        "SELECT id, user_id, period_id, content, created_at, updated_at FROM reflections WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("reflection"))
}

/// All reflections for a user.
///
/// # Errors
/// Returns error on database failure.
pub async fn list_reflections(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<Reflection>> {
    Ok(sqlx::query_as::<_, Reflection>(
        "SELECT id, user_id, period_id, content, created_at, updated_at FROM reflections WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Create a principle.
///
/// # Errors
/// Returns error on database failure.
pub async fn create_principle(
    pool: &SqlitePool,
    user_id: Uuid,
    title: &str,
    description: &str,
    sort_order: i64,
) -> StoreResult<Principle> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO principles (id, user_id, title, description, sort_order) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(user_id)
    .bind(title)
    .bind(description)
    .bind(sort_order)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Principle>(
        "SELECT id, user_id, title, description, sort_order FROM principles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("principle"))
}

/// All principles for a user.
///
/// # Errors
/// Returns error on database failure.
pub async fn list_principles(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<Principle>> {
    Ok(sqlx::query_as::<_, Principle>(
        "SELECT id, user_id, title, description, sort_order FROM principles WHERE user_id = ? ORDER BY sort_order",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}
