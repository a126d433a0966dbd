//! Route modules.

pub mod admin;
pub mod events;
pub mod health;
pub mod metrics;
pub mod objectives;
pub mod plugins;
pub mod queries;
pub mod tags;
pub mod tasks;
pub mod widgets;

use waypoint_core::ApiError;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
