//! Dashboard widget repository functions.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::DashboardWidget;

const SELECT_COLUMNS: &str = "id, user_id, title, widget_type, config, sort_order, page";

/// Fields for creating a widget.
#[derive(Debug, Clone)]
pub struct NewWidget {
    pub user_id: Uuid,
    pub title: String,
    pub widget_type: String,
    pub config: String,
    pub sort_order: i64,
    pub page: String,
}

/// Create a widget.
///
/// # Errors
/// Returns error on database failure.
pub async fn create(pool: &SqlitePool, new: NewWidget) -> StoreResult<DashboardWidget> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO dashboard_widgets (id, user_id, title, widget_type, config, sort_order, page)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(id)
    .bind(new.user_id)
    .bind(&new.title)
    .bind(&new.widget_type)
    .bind(&new.config)
    .bind(new.sort_order)
    .bind(&new.page)
    .execute(pool)
    .await?;
    get(pool, id).await
}

/// Get a widget by id.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> StoreResult<DashboardWidget> {
    sqlx::query_as::<_, DashboardWidget>(&format!(
        "SELECT {SELECT_COLUMNS} FROM dashboard_widgets WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("widget"))
}

/// Widgets for a user, page order.
///
/// # Errors
/// Returns error on database failure.
pub async fn list(pool: &SqlitePool, user_id: Uuid) -> StoreResult<Vec<DashboardWidget>> {
    Ok(sqlx::query_as::<_, DashboardWidget>(&format!(
        "SELECT {SELECT_COLUMNS} FROM dashboard_widgets WHERE user_id = ? ORDER BY page, sort_order"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

/// Update a widget.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    title: &str,
    config: &str,
    sort_order: i64,
    page: &str,
) -> StoreResult<DashboardWidget> {
    let result = sqlx::query(
        "UPDATE dashboard_widgets SET title = ?, config = ?, sort_order = ?, page = ? WHERE id = ?",
    )
    .bind(title)
    .bind(config)
    .bind(sort_order)
    .bind(page)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("widget"));
    }
    get(pool, id).await
}

/// Delete a widget.
///
/// # Errors
/// Returns `NotFound` if absent.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM dashboard_widgets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("widget"));
    }
    Ok(())
}
