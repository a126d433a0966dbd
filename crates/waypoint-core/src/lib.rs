//! # Waypoint Core
//!
//! Shared types, traits, and utilities for the Waypoint goal tracker.
//!
//! This crate provides:
//! - Common id newtypes used across all crates (`UserId`, `TaskId`, etc.)
//! - Error types for API boundaries using `thiserror`
//! - Plugin credential types with expiry helpers
//! - Time formatting helpers shared by the sandbox and the metric engine
//! - Week numbering and "today" resolution in the user's timezone
//! - Result type aliases using `anyhow` for internal operations

pub mod credentials;
pub mod error;
pub mod timefmt;
pub mod types;
pub mod week;

// Re-export commonly used types at crate root
pub use credentials::PluginCredentials;
pub use error::{ApiError, ErrorResponse, ExternalErrorKind, SandboxErrorKind};
pub use timefmt::{format_duration, format_percent, parse_time};
pub use types::{
    KeyResultId, ObjectiveId, PeriodId, QueryId, TagId, TaskId, TemplateId, UserId, WidgetId,
};
pub use week::{week_number, TodayInfo, WeekStart};

/// Result type alias for internal operations using `anyhow`
pub type Result<T> = anyhow::Result<T>;
