//! Plugin endpoints: listing, connection state, OAuth flow, and sync.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use waypoint_core::{ApiError, ExternalErrorKind};
use waypoint_plugins::pkce::constant_time_eq;
use waypoint_store::plugins as plugin_store;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::routes::ApiResult;

/// Cookie carrying the OAuth state between redirect and callback.
const STATE_COOKIE: &str = "waypoint_oauth_state";

/// Create the plugins router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/:id/sync", post(sync_now))
        .route("/plugins/:id/auth", get(start_auth))
        .route("/plugins/:id/callback", get(auth_callback))
        .route("/plugins/:id", axum::routing::delete(disconnect))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PluginView {
    id: String,
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    configured: bool,
    connected: bool,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sync: Option<String>,
    fields: Vec<waypoint_plugins::FieldDescriptor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SyncBody {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    records_imported: usize,
    values_written: usize,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn list_plugins(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let connections = plugin_store::list_for_user(&state.pool, user.id).await?;

    let mut views = Vec::new();
    for plugin in state.registry.all() {
        let connection = connections
            .iter()
            .find(|connection| connection.plugin_id == plugin.id());
        views.push(PluginView {
            id: plugin.id().to_string(),
            name: plugin.name().to_string(),
            description: plugin.description().to_string(),
            icon: plugin.icon().map(String::from),
            configured: plugin.is_configured().await,
            connected: connection.is_some_and(|c| c.credentials.is_some()),
            enabled: connection.is_some_and(|c| c.enabled),
            last_sync: connection
                .and_then(|c| c.last_sync)
                .map(|t| t.to_rfc3339()),
            fields: plugin.available_fields(),
        });
    }
    Ok(Json(views))
}

/// Trigger a sync for one plugin now.
async fn sync_now(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(plugin_id): Path<String>,
    body: Option<Json<SyncBody>>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let range = match (body.start_date, body.end_date) {
        (Some(start), Some(end)) if start <= end => Some((start, end)),
        (Some(_), Some(_)) => {
            return Err(ApiError::Validation("startDate must be <= endDate".into()))
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::Validation(
                "startDate and endDate must be given together".into(),
            ))
        }
    };

    let report = state
        .scheduler
        .sync_now(user.id, &plugin_id, range)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(SyncResponse {
        records_imported: report.records_imported,
        values_written: report.values_written,
    }))
}

/// Begin the OAuth flow: 302 to the provider with state in a cookie.
async fn start_auth(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(plugin_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let plugin = state
        .registry
        .get(&plugin_id)
        .ok_or_else(|| ApiError::NotFound("plugin".into()))?;
    if !plugin.is_configured().await {
        return Err(ApiError::Validation(format!(
            "plugin {plugin_id} is not configured"
        )));
    }

    let oauth_config = plugin.oauth_config().await.map_err(|e| {
        ApiError::external(ExternalErrorKind::TokenExchangeFailed, e.to_string())
    })?;
    let (url, oauth_state) = state.broker.begin(user.id, &plugin_id, &oauth_config);

    let cookie = format!(
        "{STATE_COOKIE}={oauth_state}; Path=/; HttpOnly; SameSite=Lax; Max-Age=600"
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::temporary(&url),
    ))
}

/// OAuth callback: verify state, exchange the code, persist credentials.
async fn auth_callback(
    State(state): State<AppState>,
    Path(plugin_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<impl IntoResponse> {
    if let Some(error) = query.error {
        warn!(plugin = %plugin_id, provider_error = %error, "Authorization denied");
        return Ok(settings_redirect(&plugin_id, Some("denied")));
    }

    let (Some(code), Some(query_state)) = (query.code, query.state) else {
        return Ok(settings_redirect(&plugin_id, Some("invalid_state")));
    };

    // The state must match both the cookie copy and a pending entry.
    let cookie_state = state_cookie(&headers);
    let cookie_matches = cookie_state
        .as_deref()
        .is_some_and(|cookie| constant_time_eq(cookie, &query_state));
    if !cookie_matches {
        warn!(plugin = %plugin_id, "State cookie mismatch on callback");
        return Ok(settings_redirect(&plugin_id, Some("invalid_state")));
    }

    let pending = match state.broker.take_pending(&query_state) {
        Ok(pending) if pending.plugin_id == plugin_id => pending,
        _ => return Ok(settings_redirect(&plugin_id, Some("invalid_state"))),
    };

    let plugin = state
        .registry
        .get(&plugin_id)
        .ok_or_else(|| ApiError::NotFound("plugin".into()))?;
    let oauth_config = plugin.oauth_config().await.map_err(|e| {
        ApiError::external(ExternalErrorKind::TokenExchangeFailed, e.to_string())
    })?;

    let credentials = match state
        .broker
        .exchange_code(&oauth_config, &code, &pending.code_verifier)
        .await
    {
        Ok(credentials) => credentials,
        Err(e) => {
            warn!(plugin = %plugin_id, error = %e, "Token exchange failed");
            return Ok(settings_redirect(&plugin_id, Some("token_exchange_failed")));
        }
    };

    let sealed = state
        .encryptor
        .encrypt_json(&credentials)
        .map_err(ApiError::Internal)?;
    plugin_store::store_credentials(&state.pool, pending.user_id, &plugin_id, &sealed).await?;

    info!(plugin = %plugin_id, user_id = %pending.user_id, "Plugin connected");
    Ok(settings_redirect(&plugin_id, None))
}

/// Disconnect a plugin, dropping its credentials.
async fn disconnect(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(plugin_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    plugin_store::delete(&state.pool, user.id, &plugin_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn settings_redirect(plugin_id: &str, error: Option<&str>) -> axum::response::Response {
    let target = match error {
        None => format!("/settings/plugins?success={plugin_id}"),
        Some(error) => format!("/settings/plugins?error={error}&plugin={plugin_id}"),
    };
    Redirect::temporary(&target).into_response()
}

fn state_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == STATE_COOKIE).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; waypoint_oauth_state=abc123; theme=dark"
                .parse()
                .expect("valid header"),
        );
        assert_eq!(state_cookie(&headers).as_deref(), Some("abc123"));

        let empty = HeaderMap::new();
        assert_eq!(state_cookie(&empty), None);
    }
}
