//! Caller identity extraction.
//!
//! Session login and password handling live in an outer collaborator; this
//! service trusts the `X-User-Id` header it forwards, resolves it to a
//! stored user, and rejects disabled accounts at the boundary. Admin-only
//! surfaces additionally require the admin flag.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use waypoint_core::ApiError;
use waypoint_store::{users, User};

use crate::app::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated, enabled user for this request.
pub struct CurrentUser(pub User);

/// The authenticated user, additionally required to be an admin.
pub struct AdminUser(pub User);

async fn resolve_user(parts: &Parts, state: &AppState) -> Result<User, ApiError> {
    let header = parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing user header".into()))?;

    let user_id = Uuid::parse_str(header)
        .map_err(|_| ApiError::Unauthorized("malformed user header".into()))?;

    users::get_active(&state.pool, user_id)
        .await
        .map_err(|_| ApiError::Unauthorized("unknown or disabled user".into()))
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_user(parts, state).await?))
    }
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = resolve_user(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::Forbidden("admin access required".into()));
        }
        Ok(Self(user))
    }
}
