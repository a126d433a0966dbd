//! Metrics template repository functions.
//!
//! Definition JSON is validated by the metrics engine before it reaches
//! this layer; the store treats it as opaque text.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::MetricsTemplate;

const SELECT_COLUMNS: &str = "id, user_id, name, effective_from, metrics_definition, created_at";

/// Create a template.
///
/// # Errors
/// Returns error on database failure.
pub async fn create(
    pool: &SqlitePool,
    user_id: Uuid,
    name: &str,
    effective_from: NaiveDate,
    metrics_definition: &str,
) -> StoreResult<MetricsTemplate> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO metrics_templates (id, user_id, name, effective_from, metrics_definition, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .bind(effective_from)
    .bind(metrics_definition)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    get(pool, id).await
}

/// Get a template by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<MetricsTemplate> {
    sqlx::query_as::<_, MetricsTemplate>(&format!(
        "SELECT {SELECT_COLUMNS} FROM metrics_templates WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("metrics template"))
}

/// The template active on `date`: greatest `effective_from <= date`.
///
/// # Errors
/// Returns error on database failure.
pub async fn active_for_date(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
) -> StoreResult<Option<MetricsTemplate>> {
    Ok(sqlx::query_as::<_, MetricsTemplate>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM metrics_templates
        WHERE user_id = ? AND effective_from <= ?
        ORDER BY effective_from DESC, created_at DESC
        LIMIT 1
        "
    ))
    .bind(user_id)
    .bind(date)
    .fetch_optional(pool)
    .await?)
}

/// All templates for a user, newest first.
///
/// # Errors
/// Returns error on database failure.
pub async fn list(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<MetricsTemplate>> {
    Ok(sqlx::query_as::<_, MetricsTemplate>(&format!(
        "SELECT {SELECT_COLUMNS} FROM metrics_templates WHERE user_id = ? ORDER BY effective_from DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Update a template.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    name: &str,
    effective_from: NaiveDate,
    metrics_definition: &str,
) -> StoreResult<MetricsTemplate> {
    let result = sqlx::query(
        "UPDATE metrics_templates SET name = ?, effective_from = ?, metrics_definition = ? WHERE id = ?",
    )
    .bind(name)
    .bind(effective_from)
    .bind(metrics_definition)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("metrics template"));
    }
    get(pool, id).await
}

/// Delete a template.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM metrics_templates WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("metrics template"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_pool, users};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[tokio::test]
    async fn test_active_template_selection() {
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

        let old = create(&pool, user.id, "v1", date(2025, 1, 1), "[]")
            .await
            .expect("create v1");
        let new = create(&pool, user.id, "v2", date(2025, 3, 1), "[]")
            .await
            .expect("create v2");

        // Before either template: none active.
        assert!(active_for_date(&pool, user.id, date(2024, 12, 31))
            .await
            .expect("query")
            .is_none());

        // Between effective dates: v1 wins.
        let active = active_for_date(&pool, user.id, date(2025, 2, 15))
            .await
            .expect("query")
            .expect("some template");
        assert_eq!(active.id, old.id);

        // On and after the newer effective date: v2 wins.
        let active = active_for_date(&pool, user.id, date(2025, 3, 1))
            .await
            .expect("query")
            .expect("some template");
        assert_eq!(active.id, new.id);
    }
}
