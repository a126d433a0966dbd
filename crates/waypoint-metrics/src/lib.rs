//! # Waypoint Metrics
//!
//! The flexible-metrics engine: per-day metric templates mixing user input,
//! computed expressions, and plugin-synced external values.
//!
//! - [`definition`] — metric definitions, save-time validation, cycle
//!   rejection
//! - [`expr`] — the tiny pure expression language computed metrics use
//! - [`engine`] — day evaluation and input writes

pub mod definition;
pub mod engine;
pub mod expr;

pub use definition::{
    parse_definitions, validate_definitions, DefinitionError, InputType, MetricDefinition,
    MetricType,
};
pub use engine::{evaluate_day, put_values, DayMetrics};
pub use expr::{Expr, ExprError};
