//! Saved query CRUD and script execution endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use waypoint_core::UserId;
use waypoint_events::ChangeTag;
use waypoint_query::{ExecutionContext, QuerySource};
use waypoint_store::{queries, QueryType};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the queries router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queries", get(list_queries).post(create_query))
        .route("/queries/execute", post(execute_inline))
        .route(
            "/queries/:id",
            put(update_query).delete(delete_query).post(execute_saved),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    name: String,
    code: String,
    query_type: QueryType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteInlineBody {
    code: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ExecuteSavedBody {
    #[serde(default)]
    params: serde_json::Value,
}

async fn list_queries(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let rows = queries::list(&state.pool, user.id).await?;
    Ok(Json(rows))
}

async fn create_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<QueryBody>,
) -> ApiResult<impl IntoResponse> {
    let query =
        queries::create(&state.pool, user.id, &body.name, &body.code, body.query_type).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Queries);
    Ok((StatusCode::CREATED, Json(query)))
}

async fn update_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<QueryBody>,
) -> ApiResult<impl IntoResponse> {
    queries::get_owned(&state.pool, user.id, id).await?;
    let query = queries::update(&state.pool, id, &body.name, &body.code, body.query_type).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Queries);
    Ok(Json(query))
}

async fn delete_query(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    queries::get_owned(&state.pool, user.id, id).await?;
    queries::delete(&state.pool, id).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Queries);
    Ok(StatusCode::NO_CONTENT)
}

/// Execute inline code ad hoc.
async fn execute_inline(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ExecuteInlineBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .executor
        .execute(
            user.id,
            QuerySource::Inline(body.code),
            body.params,
            ExecutionContext::General,
        )
        .await?;
    Ok(Json(outcome))
}

/// Execute a saved query.
async fn execute_saved(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteSavedBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .executor
        .execute(
            user.id,
            QuerySource::Saved(id),
            body.params,
            ExecutionContext::Widget,
        )
        .await?;
    Ok(Json(outcome))
}
