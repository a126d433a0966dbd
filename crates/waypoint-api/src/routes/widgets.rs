//! Dashboard widget endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use waypoint_core::{ApiError, UserId};
use waypoint_events::ChangeTag;
use waypoint_store::{widgets, NewWidget};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the widgets router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/widgets", get(list_widgets).post(create_widget))
        .route("/widgets/:id", put(update_widget).delete(delete_widget))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WidgetBody {
    title: String,
    widget_type: String,
    /// JSON blob with inline `code` or a `queryId` reference
    config: serde_json::Value,
    #[serde(default)]
    sort_order: i64,
    #[serde(default = "default_page")]
    page: String,
}

fn default_page() -> String {
    "main".to_string()
}

async fn list_widgets(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let rows = widgets::list(&state.pool, user.id).await?;
    Ok(Json(rows))
}

async fn create_widget(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<WidgetBody>,
) -> ApiResult<impl IntoResponse> {
    let widget = widgets::create(
        &state.pool,
        NewWidget {
            user_id: user.id,
            title: body.title,
            widget_type: body.widget_type,
            config: body.config.to_string(),
            sort_order: body.sort_order,
            page: body.page,
        },
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Widgets);
    Ok((StatusCode::CREATED, Json(widget)))
}

async fn update_widget(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<WidgetBody>,
) -> ApiResult<impl IntoResponse> {
    owned(&state, user.id, id).await?;
    let widget = widgets::update(
        &state.pool,
        id,
        &body.title,
        &body.config.to_string(),
        body.sort_order,
        &body.page,
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Widgets);
    Ok(Json(widget))
}

async fn delete_widget(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    owned(&state, user.id, id).await?;
    widgets::delete(&state.pool, id).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Widgets);
    Ok(StatusCode::NO_CONTENT)
}

async fn owned(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    let widget = widgets::get(&state.pool, id).await?;
    if widget.user_id != user_id {
        return Err(ApiError::NotFound("widget".into()));
    }
    Ok(())
}
