//! Objective and key result repository functions.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{KeyResult, MeasurementType, Objective, ObjectiveLevel};

const OBJECTIVE_COLUMNS: &str =
    "id, user_id, level, year, month, title, weight, parent_id, sort_order";
const KR_COLUMNS: &str = "id, objective_id, title, weight, score, measurement, checkbox_items, \
                          progress_query_id, progress_query_code, sort_order";

/// Fields for creating an objective.
#[derive(Debug, Clone)]
pub struct NewObjective {
    pub user_id: Uuid,
    pub level: ObjectiveLevel,
    pub year: i64,
    pub month: Option<i64>,
    pub title: String,
    pub weight: f64,
    pub parent_id: Option<Uuid>,
}

/// Fields for creating a key result.
#[derive(Debug, Clone)]
pub struct NewKeyResult {
    pub objective_id: Uuid,
    pub title: String,
    pub weight: f64,
    pub measurement: MeasurementType,
    pub checkbox_items: Option<String>,
    pub progress_query_id: Option<Uuid>,
    pub progress_query_code: Option<String>,
}

/// Create an objective.
///
/// # Errors
/// Returns error on database failure.
pub async fn create(pool: &SqlitePool, new: NewObjective) -> StoreResult<Objective> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO objectives (id, user_id, level, year, month, title, weight, parent_id, sort_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
        ",
    )
    .bind(id)
    .bind(new.user_id)
    .bind(new.level)
    .bind(new.year)
    .bind(new.month)
    .bind(&new.title)
    .bind(new.weight)
    .bind(new.parent_id)
    .execute(pool)
    .await?;
    get(pool, id).await
}

/// Get an objective by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<Objective> {
    sqlx::query_as::<_, Objective>(&format!(
        "SELECT {OBJECTIVE_COLUMNS} FROM objectives WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("objective"))
}

/// List objectives for a user, optionally narrowed by year and level.
///
/// # Errors
/// Returns error on database failure.
pub async fn list(
    pool: &SqlitePool,
    user_id: Uuid,
    year: Option<i64>,
    level: Option<ObjectiveLevel>,
) -> StoreResult<Vec<Objective>> {
    let mut sql = format!("SELECT {OBJECTIVE_COLUMNS} FROM objectives WHERE user_id = ?");
    if year.is_some() {
        sql.push_str(" AND year = ?");
    }
    if level.is_some() {
        sql.push_str(" AND level = ?");
    }
    sql.push_str(" ORDER BY year, month, sort_order, title");

    let mut query = sqlx::query_as::<_, Objective>(&sql).bind(user_id);
    if let Some(year) = year {
        query = query.bind(year);
    }
    if let Some(level) = level {
        query = query.bind(level);
    }
    Ok(query.fetch_all(pool).await?)
}

/// Update an objective's mutable fields.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    title: &str,
    weight: f64,
) -> StoreResult<Objective> {
    let result = sqlx::query("UPDATE objectives SET title = ?, weight = ? WHERE id = ?")
        .bind(title)
        .bind(weight)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("objective"));
    }
    get(pool, id).await
}

/// Delete an objective (key results cascade).
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM objectives WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("objective"));
    }
    Ok(())
}

// ============================================================================
// Key results
// ============================================================================

/// Create a key result under an objective.
///
/// # Errors
/// Returns error on database failure.
pub async fn create_kr(pool: &SqlitePool, new: NewKeyResult) -> StoreResult<KeyResult> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO key_results (id, objective_id, title, weight, score, measurement,
                                 checkbox_items, progress_query_id, progress_query_code, sort_order)
        VALUES (?, ?, ?, ?, 0.0, ?, ?, ?, ?, 0)
        ",
    )
    .bind(id)
    .bind(new.objective_id)
    .bind(&new.title)
    .bind(new.weight)
    .bind(new.measurement)
    .bind(&new.checkbox_items)
    .bind(new.progress_query_id)
    .bind(&new.progress_query_code)
    .execute(pool)
    .await?;
    get_kr(pool, id).await
}

/// Get a key result by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get_kr(pool: &SqlitePool, id: Uuid) -> StoreResult<KeyResult> {
    sqlx::query_as::<_, KeyResult>(&format!(
        "SELECT {KR_COLUMNS} FROM key_results WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("key result"))
}

/// Key results of one objective, in display order.
///
/// # Errors
/// Returns error on database failure.
pub async fn krs_for_objective(pool: &SqlitePool, objective_id: Uuid) -> StoreResult<Vec<KeyResult>> {
    Ok(sqlx::query_as::<_, KeyResult>(&format!(
        "SELECT {KR_COLUMNS} FROM key_results WHERE objective_id = ? ORDER BY sort_order, title"
    ))
    .bind(objective_id)
    .fetch_all(pool)
    .await?)
}

/// Key results for every objective of a user (scoring batch path).
///
/// # Errors
/// Returns error on database failure.
pub async fn krs_for_user(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<KeyResult>> {
    Ok(sqlx::query_as::<_, KeyResult>(&format!(
        r"
        SELECT k.id, k.objective_id, k.title, k.weight, k.score, k.measurement,
               k.checkbox_items, k.progress_query_id, k.progress_query_code, k.sort_order
        FROM key_results k
        JOIN objectives o ON o.id = k.objective_id
        WHERE o.user_id = ?
        ORDER BY k.sort_order
        "
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Verify a key result belongs to the given user, returning it.
///
/// # Errors
/// Returns `NotFound` if absent or owned by someone else.
pub async fn get_kr_owned(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> StoreResult<KeyResult> {
    let kr = get_kr(pool, id).await?;
    let objective = get(pool, kr.objective_id).await?;
    if objective.user_id != user_id {
        return Err(StoreError::NotFound("key result"));
    }
    Ok(kr)
}

/// Update a key result's mutable fields.
///
/// # Errors
/// Returns `NotFound` if absent.
#[allow(clippy::too_many_arguments)]
pub async fn update_kr(
    pool: &SqlitePool,
    id: Uuid,
    title: &str,
    weight: f64,
    measurement: MeasurementType,
    checkbox_items: Option<String>,
    progress_query_id: Option<Uuid>,
    progress_query_code: Option<String>,
) -> StoreResult<KeyResult> {
    let result = sqlx::query(
        r"
        UPDATE key_results
        SET title = ?, weight = ?, measurement = ?, checkbox_items = ?,
            progress_query_id = ?, progress_query_code = ?
        WHERE id = ?
        ",
    )
    .bind(title)
    .bind(weight)
    .bind(measurement)
    .bind(&checkbox_items)
    .bind(progress_query_id)
    .bind(&progress_query_code)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("key result"));
    }
    get_kr(pool, id).await
}

/// Write a key result's score.
///
/// For slider and checkbox variants the stored score is authoritative; for
/// custom-query variants it is the cached last-observed value.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn set_kr_score(pool: &SqlitePool, id: Uuid, score: f64) -> StoreResult<()> {
    let result = sqlx::query("UPDATE key_results SET score = ? WHERE id = ?")
        .bind(score.clamp(0.0, 1.0))
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("key result"));
    }
    Ok(())
}

/// Delete a key result.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete_kr(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM key_results WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("key result"));
    }
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
    async fn test_objective_with_krs() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        let objective = create(
            &pool,
            NewObjective {
                user_id,
                level: ObjectiveLevel::Yearly,
                year: 2025,
                month: None,
                title: "Get fit".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create objective");

        let kr = create_kr(
            &pool,
            NewKeyResult {
                objective_id: objective.id,
                title: "Run 500 km".into(),
                weight: 2.0,
                measurement: MeasurementType::Slider,
                checkbox_items: None,
                progress_query_id: None,
                progress_query_code: None,
            },
        )
        .await
        .expect("create kr");

        set_kr_score(&pool, kr.id, 0.4).await.expect("set score");
        let fetched = get_kr(&pool, kr.id).await.expect("get kr");
        assert!((fetched.score - 0.4).abs() < f64::EPSILON);

        let krs = krs_for_objective(&pool, objective.id).await.expect("list krs");
        assert_eq!(krs.len(), 1);
    }

    #[tokio::test]
    async fn test_score_is_clamped() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let objective = create(
            &pool,
            NewObjective {
                user_id,
                level: ObjectiveLevel::Monthly,
                year: 2025,
                month: Some(3),
                title: "Ship".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create objective");
        let kr = create_kr(
            &pool,
            NewKeyResult {
                objective_id: objective.id,
                title: "Overachieve".into(),
                weight: 1.0,
                measurement: MeasurementType::CustomQuery,
                checkbox_items: None,
                progress_query_id: None,
                progress_query_code: Some("progress.set(150, 100)".into()),
            },
        )
        .await
        .expect("create kr");

        set_kr_score(&pool, kr.id, 1.5).await.expect("set score");
        let fetched = get_kr(&pool, kr.id).await.expect("get kr");
        assert!((fetched.score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_objective_cascade_removes_krs() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let objective = create(
            &pool,
            NewObjective {
                user_id,
                level: ObjectiveLevel::Yearly,
                year: 2025,
                month: None,
                title: "Read".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create objective");
        let kr = create_kr(
            &pool,
            NewKeyResult {
                objective_id: objective.id,
                title: "12 books".into(),
                weight: 1.0,
                measurement: MeasurementType::Checkboxes,
                checkbox_items: Some("[]".into()),
                progress_query_id: None,
                progress_query_code: None,
            },
        )
        .await
        .expect("create kr");

        delete(&pool, objective.id).await.expect("delete objective");
        assert!(matches!(
            get_kr(&pool, kr.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
