//! Admin and profile surfaces: config, execution logs, export/import.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use waypoint_core::ApiError;
use waypoint_config::ConfigEntry;
use waypoint_store::{execution_log, export};

use crate::app::AppState;
use crate::auth::{AdminUser, CurrentUser};
use crate::routes::ApiResult;

/// Create the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/config", get(get_config).put(put_config))
        .route("/admin/execution-logs", get(execution_logs))
        .route("/export", get(export_profile))
        .route("/import", post(import_profile))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

const fn default_limit() -> i64 {
    50
}

/// Config entries; secrets stay redacted for non-admin callers elsewhere,
/// this surface is admin-only and sees everything.
async fn get_config(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> ApiResult<impl IntoResponse> {
    let entries = state.config.get_all(true).await.map_err(ApiError::Internal)?;
    Ok(Json(entries))
}

async fn put_config(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(entries): Json<Vec<ConfigEntry>>,
) -> ApiResult<impl IntoResponse> {
    state
        .config
        .put_many(&entries)
        .await
        .map_err(ApiError::Internal)?;
    info!(admin = %admin.username, count = entries.len(), "Config updated");
    Ok(StatusCode::NO_CONTENT)
}

/// A user's own execution log, newest first.
async fn execution_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.clamp(1, 500);
    let rows = execution_log::list_recent(&state.pool, user.id, limit, query.offset.max(0)).await?;
    Ok(Json(rows))
}

/// Whole-profile export.
async fn export_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let document = export::export_user(&state.pool, user.id).await?;
    Ok(Json(document))
}

/// Whole-profile import into a fresh user. Admin-only; fails closed on
/// schema mismatch.
async fn import_profile(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(document): Json<export::ExportDocument>,
) -> ApiResult<impl IntoResponse> {
    let user_id = export::import_user(&state.pool, &document).await?;
    info!(admin = %admin.username, new_user = %user_id, "Imported profile");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"userId": user_id})),
    ))
}
