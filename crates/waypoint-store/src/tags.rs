//! Tag repository functions.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::Tag;

/// Create a tag.
///
/// # Errors
/// Returns `Conflict` if the name is taken for this user.
pub async fn create(pool: &SqlitePool, user_id: Uuid, name: &str, color: &str) -> StoreResult<Tag> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tags (id, user_id, name, color) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(user_id)
        .bind(name)
        .bind(color)
        .execute(pool)
        .await?;
    get(pool, id).await
}

/// Get a tag by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<Tag> {
    sqlx::query_as::<_, Tag>("SELECT id, user_id, name, color FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("tag"))
}

/// All tags for a user.
///
/// # Errors
/// Returns error on database failure.
pub async fn list(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<Tag>> {
    Ok(
        sqlx::query_as::<_, Tag>(
            "SELECT id, user_id, name, color FROM tags WHERE user_id = ? ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?,
    )
}

/// Delete a tag (junction rows cascade).
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM tags WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("tag"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_pool, users};

    #[tokio::test]
    async fn test_tag_name_unique_per_user() {
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

        create(&pool, user.id, "focus", "#f00").await.expect("create tag");
        let err = create(&pool, user.id, "focus", "#0f0")
            .await
            .expect_err("should conflict");
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
