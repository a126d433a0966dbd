//! Daily metric value repository functions.
//!
//! One row per (user, date, metric name), upserted. `source` is `"user"`
//! for input/computed rows and the plugin id for synced external rows.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::DailyMetricValue;

const SELECT_COLUMNS: &str = "user_id, date, metric_name, value, source";

/// Upsert one value.
///
/// # Errors
/// Returns error on database failure.
pub async fn upsert(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
    metric_name: &str,
    value: &serde_json::Value,
    source: &str,
) -> StoreResult<()> {
    sqlx::query(
        r"
        INSERT INTO daily_metric_values (user_id, date, metric_name, value, source)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (user_id, date, metric_name)
        DO UPDATE SET value = excluded.value, source = excluded.source
        ",
    )
    .bind(user_id)
    .bind(date)
    .bind(metric_name)
    .bind(value.to_string())
    .bind(source)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete one value row (used when an input is cleared).
///
/// # Errors
/// Returns error on database failure.
pub async fn delete(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
    metric_name: &str,
) -> StoreResult<()> {
    sqlx::query(
        "DELETE FROM daily_metric_values WHERE user_id = ? AND date = ? AND metric_name = ?",
    )
    .bind(user_id)
    .bind(date)
    .bind(metric_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// All values for one day.
///
/// # Errors
/// Returns error on database failure.
pub async fn for_date(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
) -> StoreResult<Vec<DailyMetricValue>> {
    Ok(sqlx::query_as::<_, DailyMetricValue>(&format!(
        "SELECT {SELECT_COLUMNS} FROM daily_metric_values WHERE user_id = ? AND date = ? ORDER BY metric_name"
    ))
    .bind(user_id)
    .bind(date)
    .fetch_all(pool)
    .await?)
}

/// Values over an inclusive date range, ascending by date.
///
/// # Errors
/// Returns error on database failure.
pub async fn for_range(
    pool: &SqlitePool,
    user_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> StoreResult<Vec<DailyMetricValue>> {
    Ok(sqlx::query_as::<_, DailyMetricValue>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM daily_metric_values
        WHERE user_id = ? AND date >= ? AND date <= ?
        ORDER BY date, metric_name
        "
    ))
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?)
}

/// Every value for a user (export).
///
/// # Errors
/// Returns error on database failure.
pub async fn list_all(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<DailyMetricValue>> {
    Ok(sqlx::query_as::<_, DailyMetricValue>(&format!(
        "SELECT {SELECT_COLUMNS} FROM daily_metric_values WHERE user_id = ? ORDER BY date, metric_name"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_pool, users};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

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
    async fn test_upsert_is_idempotent() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let day = date(2025, 3, 14);

        upsert(&pool, user_id, day, "fitbit.steps", &json!(10234), "fitbit")
            .await
            .expect("first upsert");
        upsert(&pool, user_id, day, "fitbit.steps", &json!(10234), "fitbit")
            .await
            .expect("second upsert");

        let rows = for_date(&pool, user_id, day).await.expect("read rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_json(), json!(10234));
        assert_eq!(rows[0].source, "fitbit");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_value() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let day = date(2025, 3, 14);

        upsert(&pool, user_id, day, "sleep", &json!("07:30"), "user")
            .await
            .expect("first write");
        upsert(&pool, user_id, day, "sleep", &json!("08:00"), "user")
            .await
            .expect("overwrite");

        let rows = for_date(&pool, user_id, day).await.expect("read rows");
        assert_eq!(rows[0].value_json(), json!("08:00"));
    }

    #[tokio::test]
    async fn test_range_is_ascending_and_inclusive() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        for (day, steps) in [(12, 1000), (13, 2000), (14, 3000)] {
            upsert(
                &pool,
                user_id,
                date(2025, 3, day),
                "fitbit.steps",
                &json!(steps),
                "fitbit",
            )
            .await
            .expect("upsert");
        }

        let rows = for_range(&pool, user_id, date(2025, 3, 13), date(2025, 3, 14))
            .await
            .expect("range");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date(2025, 3, 13));
        assert_eq!(rows[1].date, date(2025, 3, 14));
    }
}
