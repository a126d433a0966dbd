//! Time period repository functions.
//!
//! Periods are created lazily on the first write that targets them; at most
//! one row exists per (user, type, scope tuple).

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{PeriodScope, PeriodType, TimePeriod};

const SELECT_COLUMNS: &str = "id, user_id, period_type, year, month, week, day";

/// Get an existing period for the scope, if any.
///
/// # Errors
/// Returns error on database failure.
pub async fn find(
    pool: &SqlitePool,
    user_id: Uuid,
    period_type: PeriodType,
    scope: PeriodScope,
) -> StoreResult<Option<TimePeriod>> {
    Ok(sqlx::query_as::<_, TimePeriod>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM time_periods
        WHERE user_id = ? AND period_type = ? AND year = ?
          AND COALESCE(month, 0) = COALESCE(?, 0)
          AND COALESCE(week, 0) = COALESCE(?, 0)
          AND COALESCE(day, 0) = COALESCE(?, 0)
        "
    ))
    .bind(user_id)
    .bind(period_type)
    .bind(scope.year)
    .bind(scope.month)
    .bind(scope.week)
    .bind(scope.day)
    .fetch_optional(pool)
    .await?)
}

/// Get or lazily create the period for the scope.
///
/// # Errors
/// Returns error on database failure.
pub async fn get_or_create(
    pool: &SqlitePool,
    user_id: Uuid,
    period_type: PeriodType,
    scope: PeriodScope,
) -> StoreResult<TimePeriod> {
    // INSERT OR IGNORE leans on the scope unique index, so a concurrent
    // creation of the same scope leaves exactly one row either way.
    sqlx::query(
        r"
        INSERT OR IGNORE INTO time_periods (id, user_id, period_type, year, month, week, day)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(period_type)
    .bind(scope.year)
    .bind(scope.month)
    .bind(scope.week)
    .bind(scope.day)
    .execute(pool)
    .await?;

    find(pool, user_id, period_type, scope)
        .await?
        .ok_or(StoreError::NotFound("time period"))
}

/// Get a period by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<TimePeriod> {
    sqlx::query_as::<_, TimePeriod>(&format!(
        "SELECT {SELECT_COLUMNS} FROM time_periods WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("time period"))
}

/// All periods of one type for a user in a year.
///
/// # Errors
/// Returns error on database failure.
pub async fn list_for_year(
    pool: &SqlitePool,
    user_id: Uuid,
    period_type: PeriodType,
    year: i64,
) -> StoreResult<Vec<TimePeriod>> {
    Ok(sqlx::query_as::<_, TimePeriod>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM time_periods
        WHERE user_id = ? AND period_type = ? AND year = ?
        ORDER BY year, month, week, day
        "
    ))
    .bind(user_id)
    .bind(period_type)
    .bind(year)
    .fetch_all(pool)
    .await?)
}

/// All periods for a user (export).
///
/// # Errors
/// Returns error on database failure.
pub async fn list_all(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<TimePeriod>> {
    Ok(sqlx::query_as::<_, TimePeriod>(&format!(
        r"
        SELECT {SELECT_COLUMNS} FROM time_periods
        WHERE user_id = ?
        ORDER BY period_type, year, month, week, day
        "
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use crate::users;

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
    async fn test_lazy_creation_is_idempotent() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let scope = PeriodScope::weekly(2025, 12);

        let first = get_or_create(&pool, user_id, PeriodType::Weekly, scope)
            .await
            .expect("first create");
        let second = get_or_create(&pool, user_id, PeriodType::Weekly, scope)
            .await
            .expect("second create");

        assert_eq!(first.id, second.id);

        let all = list_for_year(&pool, user_id, PeriodType::Weekly, 2025)
            .await
            .expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_scopes_get_distinct_periods() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        let yearly = get_or_create(&pool, user_id, PeriodType::Yearly, PeriodScope::yearly(2025))
            .await
            .expect("yearly");
        let daily = get_or_create(
            &pool,
            user_id,
            PeriodType::Daily,
            PeriodScope::daily(2025, 3, 14),
        )
        .await
        .expect("daily");

        assert_ne!(yearly.id, daily.id);
        assert_eq!(daily.month, Some(3));
        assert_eq!(daily.day, Some(14));
    }

    #[tokio::test]
    async fn test_user_cascade_removes_periods() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        get_or_create(&pool, user_id, PeriodType::Yearly, PeriodScope::yearly(2025))
            .await
            .expect("create period");

        users::delete(&pool, user_id).await.expect("delete user");

        let rows = list_all(&pool, user_id).await.expect("list");
        assert!(rows.is_empty());
    }
}
