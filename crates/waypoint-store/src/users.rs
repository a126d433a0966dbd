//! User repository functions.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::User;

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub timezone: Option<String>,
    pub week_start: String,
    pub is_admin: bool,
}

/// Create a user.
///
/// # Errors
/// Returns `Conflict` if the username is taken.
pub async fn create(pool: &SqlitePool, new: NewUser) -> StoreResult<User> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO users (id, username, display_name, timezone, week_start, is_admin, is_disabled, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?)
        ",
    )
    .bind(id)
    .bind(&new.username)
    .bind(&new.display_name)
    .bind(&new.timezone)
    .bind(&new.week_start)
    .bind(new.is_admin)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

/// Get a user by id.
///
/// # Errors
/// Returns `NotFound` if the user does not exist.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<User> {
    sqlx::query_as::<_, User>(
        r"
        SELECT id, username, display_name, timezone, week_start, is_admin, is_disabled, created_at
        FROM users WHERE id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("user"))
}

/// Get a user by username.
///
/// # Errors
/// Returns error on database failure.
pub async fn get_by_username(pool: &SqlitePool, username: &str) -> StoreResult<Option<User>> {
    Ok(sqlx::query_as::<_, User>(
        r"
        SELECT id, username, display_name, timezone, week_start, is_admin, is_disabled, created_at
        FROM users WHERE username = ?
        ",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?)
}

/// Get an enabled user, rejecting disabled accounts.
///
/// This is the lookup every capability boundary uses.
///
/// # Errors
/// Returns `NotFound` for missing or disabled users.
pub async fn get_active(pool: &SqlitePool, id: Uuid) -> StoreResult<User> {
    let user = get(pool, id).await?;
    if user.is_disabled {
        return Err(StoreError::NotFound("user"));
    }
    Ok(user)
}

/// List all users (admin surface and the sync scheduler).
///
/// # Errors
/// Returns error on database failure.
pub async fn list(pool: &SqlitePool) -> StoreResult<Vec<User>> {
    Ok(sqlx::query_as::<_, User>(
        r"
        SELECT id, username, display_name, timezone, week_start, is_admin, is_disabled, created_at
        FROM users ORDER BY username
        ",
    )
    .fetch_all(pool)
    .await?)
}

/// Update preference fields.
///
/// # Errors
/// Returns `NotFound` if the user does not exist.
pub async fn update_prefs(
    pool: &SqlitePool,
    id: Uuid,
    timezone: Option<String>,
    week_start: &str,
) -> StoreResult<User> {
    let result = sqlx::query("UPDATE users SET timezone = ?, week_start = ? WHERE id = ?")
        .bind(&timezone)
        .bind(week_start)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("user"));
    }
    get(pool, id).await
}

/// Set the disabled flag.
///
/// # Errors
/// Returns `NotFound` if the user does not exist.
pub async fn set_disabled(pool: &SqlitePool, id: Uuid, disabled: bool) -> StoreResult<()> {
    let result = sqlx::query("UPDATE users SET is_disabled = ? WHERE id = ?")
        .bind(disabled)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("user"));
    }
    Ok(())
}

/// Delete a user and every owned row (cascade).
///
/// # Errors
/// Returns `NotFound` if the user does not exist.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("user"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    pub(crate) fn sample_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            display_name: username.to_string(),
            timezone: None,
            week_start: "monday".to_string(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = test_pool().await;
        let user = create(&pool, sample_user("ada")).await.expect("create failed");

        let fetched = get(&pool, user.id).await.expect("get failed");
        assert_eq!(fetched.username, "ada");
        assert!(!fetched.is_disabled);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let pool = test_pool().await;
        create(&pool, sample_user("ada")).await.expect("create failed");

        let err = create(&pool, sample_user("ada")).await.expect_err("should conflict");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_disabled_user_rejected_by_get_active() {
        let pool = test_pool().await;
        let user = create(&pool, sample_user("ada")).await.expect("create failed");

        set_disabled(&pool, user.id, true).await.expect("disable failed");

        let err = get_active(&pool, user.id).await.expect_err("should reject");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_user_not_found() {
        let pool = test_pool().await;
        let err = get(&pool, Uuid::new_v4()).await.expect_err("should miss");
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
