//! Saved query repository functions.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{QueryType, SavedQuery};

/// Maximum accepted script size in bytes (100 KB).
pub const MAX_CODE_BYTES: usize = 100 * 1024;

const SELECT_COLUMNS: &str = "id, user_id, name, code, query_type, created_at, updated_at";

/// Create a saved query.
///
/// # Errors
/// Returns `Conflict` (as a `StoreError::Conflict`) if the code exceeds the
/// size cap, or a database error otherwise.
pub async fn create(
    pool: &SqlitePool,
    user_id: Uuid,
    name: &str,
    code: &str,
    query_type: QueryType,
) -> StoreResult<SavedQuery> {
    check_code_size(code)?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        r"
        INSERT INTO saved_queries (id, user_id, name, code, query_type, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .bind(code)
    .bind(query_type)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    get(pool, id).await
}

/// Get a saved query by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<SavedQuery> {
    sqlx::query_as::<_, SavedQuery>(&format!(
        "SELECT {SELECT_COLUMNS} FROM saved_queries WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("saved query"))
}

/// Get a saved query owned by a specific user.
///
/// # Errors
/// Returns `NotFound` if absent or owned by someone else.
pub async fn get_owned(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> StoreResult<SavedQuery> {
    let query = get(pool, id).await?;
    if query.user_id != user_id {
        return Err(StoreError::NotFound("saved query"));
    }
    Ok(query)
}

/// All saved queries for a user.
///
/// # Errors
/// Returns error on database failure.
pub async fn list(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<SavedQuery>> {
    Ok(sqlx::query_as::<_, SavedQuery>(&format!(
        "SELECT {SELECT_COLUMNS} FROM saved_queries WHERE user_id = ? ORDER BY name"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Update a saved query.
///
/// # Errors
/// Returns `NotFound` if absent or `Conflict` on code size.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    name: &str,
    code: &str,
    query_type: QueryType,
) -> StoreResult<SavedQuery> {
    check_code_size(code)?;

    let result = sqlx::query(
        "UPDATE saved_queries SET name = ?, code = ?, query_type = ?, updated_at = ? WHERE id = ?",
    )
    .bind(name)
    .bind(code)
    .bind(query_type)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("saved query"));
    }
    get(pool, id).await
}

/// Delete a saved query.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM saved_queries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("saved query"));
    }
    Ok(())
}

fn check_code_size(code: &str) -> StoreResult<()> {
    if code.len() > MAX_CODE_BYTES {
        return Err(StoreError::Conflict(format!(
            "query code exceeds {MAX_CODE_BYTES} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_pool, users};

    #[tokio::test]
    async fn test_code_size_cap() {
        let pool = test_pool().await;
        let user = users::create(
            &pool,
            users::NewUser {
                username: "ada".into(),
                display_name: "Ada".into(),
                timezone: None,
                week_start: "monday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user");

        let oversized = "x".repeat(MAX_CODE_BYTES + 1);
        let err = create(&pool, user.id, "big", &oversized, QueryType::General)
            .await
            .expect_err("should reject oversized code");
        assert!(matches!(err, StoreError::Conflict(_)));

        let ok = create(&pool, user.id, "small", "progress.set(1, 2)", QueryType::KrProgress)
            .await
            .expect("create query");
        assert_eq!(ok.query_type, QueryType::KrProgress);
    }
}
