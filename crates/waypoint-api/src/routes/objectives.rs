//! Objective and key result endpoints, including the KR progress batch.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use waypoint_core::{ApiError, UserId};
use waypoint_events::ChangeTag;
use waypoint_store::{
    objectives, KeyResult, MeasurementType, NewKeyResult, NewObjective, Objective, ObjectiveLevel,
};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the objectives router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/objectives", get(list_objectives).post(create_objective))
        .route(
            "/objectives/:id",
            put(update_objective).delete(delete_objective),
        )
        .route("/objectives/:id/key-results", post(create_kr))
        .route("/key-results/:id", put(update_kr).delete(delete_kr))
        .route("/key-results/:id/score", put(set_score))
        .route("/objectives/kr-progress", post(kr_progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    year: Option<i64>,
    level: Option<ObjectiveLevel>,
}

/// Objective with scored key results, as the dashboard consumes it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectiveView {
    #[serde(flatten)]
    objective: Objective,
    score: f64,
    key_results: Vec<KeyResultView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyResultView {
    #[serde(flatten)]
    kr: KeyResult,
    effective_score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateObjectiveBody {
    level: ObjectiveLevel,
    year: i64,
    month: Option<i64>,
    title: String,
    #[serde(default = "default_weight")]
    weight: f64,
    parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateObjectiveBody {
    title: String,
    weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResultBody {
    title: String,
    #[serde(default = "default_weight")]
    weight: f64,
    measurement: MeasurementType,
    checkbox_items: Option<serde_json::Value>,
    progress_query_id: Option<Uuid>,
    progress_query_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreBody {
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KrProgressBody {
    kr_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KrProgressResponse {
    results: HashMap<Uuid, waypoint_query::KrProgress>,
}

const fn default_weight() -> f64 {
    1.0
}

async fn list_objectives(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = objectives::list(&state.pool, user.id, query.year, query.level).await?;

    let mut views = Vec::with_capacity(rows.len());
    for objective in rows {
        let krs = objectives::krs_for_objective(&state.pool, objective.id).await?;
        views.push(ObjectiveView {
            score: waypoint_scoring::objective_score(&krs),
            key_results: krs
                .into_iter()
                .map(|kr| KeyResultView {
                    effective_score: waypoint_scoring::kr_score(&kr),
                    kr,
                })
                .collect(),
            objective,
        });
    }
    Ok(Json(views))
}

async fn create_objective(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateObjectiveBody>,
) -> ApiResult<impl IntoResponse> {
    if body.level == ObjectiveLevel::Monthly && body.month.is_none() {
        return Err(ApiError::Validation(
            "monthly objectives need a month".into(),
        ));
    }
    let objective = objectives::create(
        &state.pool,
        NewObjective {
            user_id: user.id,
            level: body.level,
            year: body.year,
            month: body.month,
            title: body.title,
            weight: body.weight,
            parent_id: body.parent_id,
        },
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok((StatusCode::CREATED, Json(objective)))
}

async fn update_objective(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateObjectiveBody>,
) -> ApiResult<impl IntoResponse> {
    owned_objective(&state, user.id, id).await?;
    let objective = objectives::update(&state.pool, id, &body.title, body.weight).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok(Json(objective))
}

async fn delete_objective(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    owned_objective(&state, user.id, id).await?;
    objectives::delete(&state.pool, id).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok(StatusCode::NO_CONTENT)
}

async fn create_kr(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(objective_id): Path<Uuid>,
    Json(body): Json<KeyResultBody>,
) -> ApiResult<impl IntoResponse> {
    owned_objective(&state, user.id, objective_id).await?;
    let kr = objectives::create_kr(
        &state.pool,
        NewKeyResult {
            objective_id,
            title: body.title,
            weight: body.weight,
            measurement: body.measurement,
            checkbox_items: checkbox_json(body.checkbox_items)?,
            progress_query_id: body.progress_query_id,
            progress_query_code: body.progress_query_code,
        },
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok((StatusCode::CREATED, Json(kr)))
}

async fn update_kr(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<KeyResultBody>,
) -> ApiResult<impl IntoResponse> {
    objectives::get_kr_owned(&state.pool, user.id, id).await?;
    let kr = objectives::update_kr(
        &state.pool,
        id,
        &body.title,
        body.weight,
        body.measurement,
        checkbox_json(body.checkbox_items)?,
        body.progress_query_id,
        body.progress_query_code,
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok(Json(kr))
}

async fn delete_kr(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    objectives::get_kr_owned(&state.pool, user.id, id).await?;
    objectives::delete_kr(&state.pool, id).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok(StatusCode::NO_CONTENT)
}

/// Write a slider KR's score directly.
async fn set_score(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ScoreBody>,
) -> ApiResult<impl IntoResponse> {
    if !(0.0..=1.0).contains(&body.score) {
        return Err(ApiError::Validation("score must be in [0, 1]".into()));
    }
    objectives::get_kr_owned(&state.pool, user.id, id).await?;
    objectives::set_kr_score(&state.pool, id, body.score).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Objectives);
    Ok(StatusCode::NO_CONTENT)
}

/// Evaluate custom-query KR scores on demand.
async fn kr_progress(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<KrProgressBody>,
) -> ApiResult<impl IntoResponse> {
    let results = state.executor.evaluate_krs(user.id, &body.kr_ids).await?;
    Ok(Json(KrProgressResponse { results }))
}

async fn owned_objective(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<Objective> {
    let objective = objectives::get(&state.pool, id).await?;
    if objective.user_id != user_id {
        return Err(ApiError::NotFound("objective".into()));
    }
    Ok(objective)
}

fn checkbox_json(value: Option<serde_json::Value>) -> ApiResult<Option<String>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(list @ serde_json::Value::Array(_)) => {
            // Validate the item shape before storing.
            serde_json::from_value::<Vec<waypoint_store::CheckboxItem>>(list.clone())
                .map_err(|e| ApiError::Validation(format!("bad checkbox items: {e}")))?;
            Ok(Some(list.to_string()))
        }
        Some(_) => Err(ApiError::Validation("checkbox items must be a list".into())),
    }
}
