//! Task endpoints: CRUD, attributes, tags, and the timer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use waypoint_core::{ApiError, UserId};
use waypoint_events::ChangeTag;
use waypoint_store::{periods, tasks, PeriodScope, PeriodType, TaskFilter};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the tasks router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            put(update_task).delete(delete_task).get(get_task),
        )
        .route("/tasks/:id/timer", post(timer_action))
        .route("/tasks/:id/attributes", put(put_attribute))
        .route("/tasks/:id/tags/:tag_id", post(add_tag).delete(remove_tag))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    year: Option<i64>,
    month: Option<i64>,
    week: Option<i64>,
    completed: Option<bool>,
    period_type: Option<PeriodType>,
    period_id: Option<Uuid>,
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody {
    title: String,
    period_type: PeriodType,
    year: i64,
    month: Option<i64>,
    week: Option<i64>,
    day: Option<i64>,
    #[serde(default)]
    sort_order: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskBody {
    title: String,
    completed: bool,
    #[serde(default)]
    sort_order: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerBody {
    action: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeBody {
    key: String,
    value: String,
}

async fn list_tasks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = TaskFilter {
        year: query.year,
        month: query.month,
        week: query.week,
        completed: query.completed,
        period_type: query.period_type,
        period_id: query.period_id,
        tag: query.tag,
    };
    let tasks = tasks::list_filtered(&state.pool, user.id, &filter).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = tasks::get_owned(&state.pool, user.id, id).await?;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateTaskBody>,
) -> ApiResult<impl IntoResponse> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("task title must not be empty".into()));
    }

    let scope = PeriodScope {
        year: body.year,
        month: body.month,
        week: body.week,
        day: body.day,
    };
    let period = periods::get_or_create(&state.pool, user.id, body.period_type, scope).await?;

    let task = tasks::create(
        &state.pool,
        tasks::NewTask {
            user_id: user.id,
            period_id: period.id,
            title: body.title,
            sort_order: body.sort_order,
        },
    )
    .await?;

    info!(task_id = %task.id, "Created task");
    publish_task_tags(&state, user.id, body.period_type);
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;
    let task = tasks::update(&state.pool, id, &body.title, body.completed, body.sort_order).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;
    tasks::delete(&state.pool, id).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(StatusCode::NO_CONTENT)
}

/// Start or stop the task timer.
async fn timer_action(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<TimerBody>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;

    let task = match body.action.as_str() {
        "start" => tasks::start_timer(&state.pool, id).await?,
        "stop" => tasks::stop_timer(&state.pool, id).await?,
        other => {
            return Err(ApiError::Validation(format!(
                "timer action must be start or stop, got {other:?}"
            )))
        }
    };

    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(Json(task))
}

async fn put_attribute(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AttributeBody>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;
    tasks::set_attribute(&state.pool, id, &body.key, &body.value).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(StatusCode::NO_CONTENT)
}

async fn add_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, tag_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;
    tasks::add_tag(&state.pool, id, tag_id).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_tag(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, tag_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    tasks::get_owned(&state.pool, user.id, id).await?;
    tasks::remove_tag(&state.pool, id, tag_id).await?;
    state.broadcaster.publish(UserId::from_uuid(user.id), ChangeTag::Tasks);
    Ok(StatusCode::NO_CONTENT)
}

fn publish_task_tags(state: &AppState, user_id: Uuid, period_type: PeriodType) {
    let user = UserId::from_uuid(user_id);
    state.broadcaster.publish(user, ChangeTag::Tasks);
    match period_type {
        PeriodType::Daily => state.broadcaster.publish(user, ChangeTag::Daily),
        PeriodType::Weekly => state.broadcaster.publish(user, ChangeTag::Weekly),
        PeriodType::Yearly | PeriodType::Monthly => {}
    }
}
