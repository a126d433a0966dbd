//! Metrics template CRUD and the per-day flexible metrics surface.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use waypoint_core::{ApiError, UserId};
use waypoint_events::ChangeTag;
use waypoint_metrics::{validate_definitions, MetricDefinition, MetricType};
use waypoint_store::templates;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/metrics/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/metrics/templates/:id",
            put(update_template).delete(delete_template),
        )
        .route("/metrics/flexible/:date", get(get_day).put(put_day))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateBody {
    name: String,
    effective_from: NaiveDate,
    metrics_definition: Vec<MetricDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutDayBody {
    values: BTreeMap<String, serde_json::Value>,
}

async fn list_templates(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let rows = templates::list(&state.pool, user.id).await?;
    Ok(Json(rows))
}

async fn create_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TemplateBody>,
) -> ApiResult<impl IntoResponse> {
    let definition_json = validate_body(&state, &body)?;
    let template = templates::create(
        &state.pool,
        user.id,
        &body.name,
        body.effective_from,
        &definition_json,
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Metrics);
    Ok((StatusCode::CREATED, Json(template)))
}

async fn update_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<TemplateBody>,
) -> ApiResult<impl IntoResponse> {
    let existing = templates::get(&state.pool, id).await?;
    if existing.user_id != user.id {
        return Err(ApiError::NotFound("metrics template".into()));
    }

    let definition_json = validate_body(&state, &body)?;
    let template = templates::update(
        &state.pool,
        id,
        &body.name,
        body.effective_from,
        &definition_json,
    )
    .await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Metrics);
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let existing = templates::get(&state.pool, id).await?;
    if existing.user_id != user.id {
        return Err(ApiError::NotFound("metrics template".into()));
    }
    templates::delete(&state.pool, id).await?;
    state
        .broadcaster
        .publish(UserId::from_uuid(user.id), ChangeTag::Metrics);
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve one day's metrics.
async fn get_day(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(date): Path<NaiveDate>,
) -> ApiResult<impl IntoResponse> {
    let day = waypoint_metrics::evaluate_day(&state.pool, user.id, date).await?;
    Ok(Json(day))
}

/// Write one day's input values.
async fn put_day(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(date): Path<NaiveDate>,
    Json(body): Json<PutDayBody>,
) -> ApiResult<impl IntoResponse> {
    let day = waypoint_metrics::put_values(&state.pool, user.id, date, &body.values).await?;
    let user_id = UserId::from_uuid(user.id);
    state.broadcaster.publish(user_id, ChangeTag::Metrics);
    state.broadcaster.publish(user_id, ChangeTag::Daily);
    Ok(Json(day))
}

/// Shared save-time validation: definition rules plus registry-backed
/// external source checks.
fn validate_body(state: &AppState, body: &TemplateBody) -> ApiResult<String> {
    validate_definitions(&body.metrics_definition)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    for def in &body.metrics_definition {
        if def.metric_type == MetricType::External {
            let source = def.source.as_deref().unwrap_or_default();
            if !state.registry.is_known_source(source) {
                return Err(ApiError::Validation(format!(
                    "metric {:?} references unknown source {source:?}",
                    def.name
                )));
            }
        }
    }

    serde_json::to_string(&body.metrics_definition)
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))
}
