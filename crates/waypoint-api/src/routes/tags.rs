//! Tag endpoints and period listing.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use waypoint_core::{ApiError, UserId};
use waypoint_events::ChangeTag;
use waypoint_store::{periods, tags, PeriodType};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the tags router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", axum::routing::delete(delete_tag))
        .route("/periods", get(list_periods))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagBody {
    name: String,
    #[serde(default)]
    color: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeriodsQuery {
    period_type: PeriodType,
    year: i64,
}

async fn list_tags(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let rows = tags::list(&state.pool, user.id).await?;
    Ok(Json(rows))
}

async fn create_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TagBody>,
) -> ApiResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("tag name must not be empty".into()));
    }
    let tag = tags::create(&state.pool, user.id, &body.name, &body.color).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn delete_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let tag = tags::get(&state.pool, id).await?;
    if tag.user_id != user.id {
        return Err(ApiError::NotFound("tag".into()));
    }
    tags::delete(&state.pool, id).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(StatusCode::NO_CONTENT)
}

/// Periods of one type in a year; periods themselves are created lazily by
/// writes, so this is read-only.
async fn list_periods(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PeriodsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = periods::list_for_year(&state.pool, user.id, query.period_type, query.year).await?;
    Ok(Json(rows))
}
