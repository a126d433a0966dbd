//! Liveness endpoint.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::app::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
