//! Task repository functions: CRUD, attributes, tag links, and the timer.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{PeriodType, Task};

const SELECT_COLUMNS: &str = "id, user_id, period_id, title, completed, completed_at, \
                              sort_order, time_spent_ms, timer_started_at, created_at";

/// Filters for task listing, mirroring the script-facing `q.tasks` surface.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub week: Option<i64>,
    pub completed: Option<bool>,
    pub period_type: Option<PeriodType>,
    pub period_id: Option<Uuid>,
    /// Tag name; tasks must carry it
    pub tag: Option<String>,
}

/// Fields for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: Uuid,
    pub period_id: Uuid,
    pub title: String,
    pub sort_order: i64,
}

/// Create a task.
///
/// # Errors
/// Returns `Database` if the period or user reference is invalid.
pub async fn create(pool: &SqlitePool, new: NewTask) -> StoreResult<Task> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO tasks (id, user_id, period_id, title, completed, sort_order,
                           time_spent_ms, created_at)
        VALUES (?, ?, ?, ?, 0, ?, 0, ?)
        ",
    )
    .bind(id)
    .bind(new.user_id)
    .bind(new.period_id)
    .bind(&new.title)
    .bind(new.sort_order)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

/// Get a task by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<Task> {
    sqlx::query_as::<_, Task>(&format!("SELECT {SELECT_COLUMNS} FROM tasks WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("task"))
}

/// Get a task owned by a specific user.
///
/// # Errors
/// Returns `NotFound` if absent or owned by someone else.
pub async fn get_owned(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> StoreResult<Task> {
    let task = get(pool, id).await?;
    if task.user_id != user_id {
        return Err(StoreError::NotFound("task"));
    }
    Ok(task)
}

/// List tasks for a user with the script-facing filters applied.
///
/// # Errors
/// Returns error on database failure.
pub async fn list_filtered(
    pool: &SqlitePool,
    user_id: Uuid,
    filter: &TaskFilter,
) -> StoreResult<Vec<Task>> {
    let mut sql = format!(
        r"
        SELECT t.id, t.user_id, t.period_id, t.title, t.completed, t.completed_at,
               t.sort_order, t.time_spent_ms, t.timer_started_at, t.created_at
        FROM tasks t
        JOIN time_periods p ON p.id = t.period_id
        WHERE t.user_id = ?
        "
    );
    if filter.year.is_some() {
        sql.push_str(" AND p.year = ?");
    }
    if filter.month.is_some() {
        sql.push_str(" AND p.month = ?");
    }
    if filter.week.is_some() {
        sql.push_str(" AND p.week = ?");
    }
    if filter.completed.is_some() {
        sql.push_str(" AND t.completed = ?");
    }
    if filter.period_type.is_some() {
        sql.push_str(" AND p.period_type = ?");
    }
    if filter.period_id.is_some() {
        sql.push_str(" AND t.period_id = ?");
    }
    if filter.tag.is_some() {
        sql.push_str(
            r"
            AND EXISTS (
                SELECT 1 FROM task_tags tt
                JOIN tags g ON g.id = tt.tag_id
                WHERE tt.task_id = t.id AND g.name = ?
            )",
        );
    }
    sql.push_str(" ORDER BY p.year, p.month, p.week, p.day, t.sort_order, t.created_at");

    let mut query = sqlx::query_as::<_, Task>(&sql).bind(user_id);
    if let Some(year) = filter.year {
        query = query.bind(year);
    }
    if let Some(month) = filter.month {
        query = query.bind(month);
    }
    if let Some(week) = filter.week {
        query = query.bind(week);
    }
    if let Some(completed) = filter.completed {
        query = query.bind(completed);
    }
    if let Some(period_type) = filter.period_type {
        query = query.bind(period_type);
    }
    if let Some(period_id) = filter.period_id {
        query = query.bind(period_id);
    }
    if let Some(ref tag) = filter.tag {
        query = query.bind(tag.clone());
    }

    Ok(query.fetch_all(pool).await?)
}

/// Update title / completed / sort order.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    title: &str,
    completed: bool,
    sort_order: i64,
) -> StoreResult<Task> {
    let completed_at = if completed { Some(Utc::now()) } else { None };
    let result = sqlx::query(
        r"
        UPDATE tasks
        SET title = ?, completed = ?,
            completed_at = CASE
                WHEN ? AND completed_at IS NULL THEN ?
                WHEN NOT ? THEN NULL
                ELSE completed_at
            END,
            sort_order = ?
        WHERE id = ?
        ",
    )
    .bind(title)
    .bind(completed)
    .bind(completed)
    .bind(completed_at)
    .bind(completed)
    .bind(sort_order)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("task"));
    }
    get(pool, id).await
}

/// Delete a task.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("task"));
    }
    Ok(())
}

// ============================================================================
// Timer
// ============================================================================

/// Start the task timer.
///
/// `timer_started_at` is the single source of "running" truth; elapsed time
/// is derived on stop, so a process restart preserves a running timer.
///
/// # Errors
/// Returns `Conflict` if the timer is already running.
pub async fn start_timer(pool: &SqlitePool, id: Uuid) -> StoreResult<Task> {
    let result = sqlx::query(
        "UPDATE tasks SET timer_started_at = ? WHERE id = ? AND timer_started_at IS NULL",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Either missing or already running; disambiguate for the caller.
        let task = get(pool, id).await?;
        if task.timer_started_at.is_some() {
            return Err(StoreError::Conflict("timer already running".into()));
        }
        return Err(StoreError::NotFound("task"));
    }
    get(pool, id).await
}

/// Stop the task timer, folding the elapsed span into `time_spent_ms`.
///
/// # Errors
/// Returns `Conflict` if the timer is not running.
pub async fn stop_timer(pool: &SqlitePool, id: Uuid) -> StoreResult<Task> {
    let task = get(pool, id).await?;
    let Some(started_at) = task.timer_started_at else {
        return Err(StoreError::Conflict("timer is not running".into()));
    };

    let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0);
    sqlx::query(
        r"
        UPDATE tasks
        SET time_spent_ms = time_spent_ms + ?, timer_started_at = NULL
        WHERE id = ? AND timer_started_at IS NOT NULL
        ",
    )
    .bind(elapsed_ms)
    .bind(id)
    .execute(pool)
    .await?;

    get(pool, id).await
}

// ============================================================================
// Attributes
// ============================================================================

/// All key/value attributes of a task.
///
/// # Errors
/// Returns error on database failure.
pub async fn attributes(pool: &SqlitePool, task_id: Uuid) -> StoreResult<HashMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM task_attributes WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

/// Upsert one attribute.
///
/// # Errors
/// Returns error on database failure.
pub async fn set_attribute(
    pool: &SqlitePool,
    task_id: Uuid,
    key: &str,
    value: &str,
) -> StoreResult<()> {
    sqlx::query(
        r"
        INSERT INTO task_attributes (task_id, key, value)
        VALUES (?, ?, ?)
        ON CONFLICT (task_id, key) DO UPDATE SET value = excluded.value
        ",
    )
    .bind(task_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Attributes for many tasks in one query (script fetch path).
///
/// # Errors
/// Returns error on database failure.
pub async fn attributes_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
) -> StoreResult<HashMap<Uuid, HashMap<String, String>>> {
    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
        r"
        SELECT a.task_id, a.key, a.value
        FROM task_attributes a
        JOIN tasks t ON t.id = a.task_id
        WHERE t.user_id = ?
        ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<Uuid, HashMap<String, String>> = HashMap::new();
    for (task_id, key, value) in rows {
        map.entry(task_id).or_default().insert(key, value);
    }
    Ok(map)
}

// ============================================================================
// Tag links
// ============================================================================

/// Attach a tag to a task (idempotent).
///
/// # Errors
/// Returns error on database failure.
pub async fn add_tag(pool: &SqlitePool, task_id: Uuid, tag_id: Uuid) -> StoreResult<()> {
    sqlx::query("INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?, ?)")
        .bind(task_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Detach a tag from a task.
///
/// # Errors
/// Returns error on database failure.
pub async fn remove_tag(pool: &SqlitePool, task_id: Uuid, tag_id: Uuid) -> StoreResult<()> {
    sqlx::query("DELETE FROM task_tags WHERE task_id = ? AND tag_id = ?")
        .bind(task_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Tag names per task for a user (script fetch path).
///
/// # Errors
/// Returns error on database failure.
pub async fn tag_names_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
) -> StoreResult<HashMap<Uuid, Vec<String>>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        r"
        SELECT tt.task_id, g.name
        FROM task_tags tt
        JOIN tags g ON g.id = tt.tag_id
        WHERE g.user_id = ?
        ORDER BY g.name
        ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (task_id, name) in rows {
        map.entry(task_id).or_default().push(name);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeriodScope;
    use crate::{periods, tags, test_pool, users};

    async fn fixtures(pool: &SqlitePool) -> (Uuid, Uuid) {
        let user = users::create(
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
        .expect("create user");
        let period = periods::get_or_create(
            pool,
            user.id,
            PeriodType::Weekly,
            PeriodScope::weekly(2025, 12),
        )
        .await
        .expect("create period");
        (user.id, period.id)
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let pool = test_pool().await;
        let (user_id, period_id) = fixtures(&pool).await;

        let task = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Write weekly review".into(),
                sort_order: 1,
            },
        )
        .await
        .expect("create task");

        let updated = update(&pool, task.id, "Write weekly review", true, 1)
            .await
            .expect("update task");
        assert!(updated.completed);
        assert!(updated.completed_at.is_some());

        delete(&pool, task.id).await.expect("delete task");
        assert!(matches!(
            get(&pool, task.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timer_round_trip() {
        let pool = test_pool().await;
        let (user_id, period_id) = fixtures(&pool).await;
        let task = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Deep work".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create task");

        let running = start_timer(&pool, task.id).await.expect("start timer");
        assert!(running.timer_started_at.is_some());

        // Double start conflicts while running.
        let err = start_timer(&pool, task.id).await.expect_err("should conflict");
        assert!(matches!(err, StoreError::Conflict(_)));

        let stopped = stop_timer(&pool, task.id).await.expect("stop timer");
        assert!(stopped.timer_started_at.is_none());
        assert!(stopped.time_spent_ms >= 0);

        // A second start immediately succeeds after stopping.
        start_timer(&pool, task.id).await.expect("restart timer");
    }

    #[tokio::test]
    async fn test_stop_without_running_conflicts() {
        let pool = test_pool().await;
        let (user_id, period_id) = fixtures(&pool).await;
        let task = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Idle".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create task");

        let err = stop_timer(&pool, task.id).await.expect_err("should conflict");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_attributes_upsert() {
        let pool = test_pool().await;
        let (user_id, period_id) = fixtures(&pool).await;
        let task = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Estimate".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create task");

        set_attribute(&pool, task.id, "expected_hours", "2.5")
            .await
            .expect("set attribute");
        set_attribute(&pool, task.id, "expected_hours", "3.0")
            .await
            .expect("overwrite attribute");

        let attrs = attributes(&pool, task.id).await.expect("read attributes");
        assert_eq!(attrs.get("expected_hours").map(String::as_str), Some("3.0"));
    }

    #[tokio::test]
    async fn test_filter_by_completed_and_tag() {
        let pool = test_pool().await;
        let (user_id, period_id) = fixtures(&pool).await;

        let done = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Done".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create");
        update(&pool, done.id, "Done", true, 0).await.expect("complete");

        let open = create(
            &pool,
            NewTask {
                user_id,
                period_id,
                title: "Open".into(),
                sort_order: 1,
            },
        )
        .await
        .expect("create");

        let tag = tags::create(&pool, user_id, "focus", "#ff0000")
            .await
            .expect("create tag");
        add_tag(&pool, open.id, tag.id).await.expect("tag task");

        let completed = list_filtered(
            &pool,
            user_id,
            &TaskFilter {
                completed: Some(true),
                ..TaskFilter::default()
            },
        )
        .await
        .expect("filter completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].title, "Done");

        let tagged = list_filtered(
            &pool,
            user_id,
            &TaskFilter {
                tag: Some("focus".into()),
                ..TaskFilter::default()
            },
        )
        .await
        .expect("filter tagged");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].title, "Open");

        let weekly = list_filtered(
            &pool,
            user_id,
            &TaskFilter {
                period_type: Some(PeriodType::Weekly),
                week: Some(12),
                ..TaskFilter::default()
            },
        )
        .await
        .expect("filter weekly");
        assert_eq!(weekly.len(), 2);
    }
}
