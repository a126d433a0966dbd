//! Row types and domain enums for the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Granularity of a time period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PeriodType {
    Yearly,
    Monthly,
    Weekly,
    Daily,
}

/// Objective scoping level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ObjectiveLevel {
    Yearly,
    Monthly,
}

/// How a key result's score is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MeasurementType {
    Slider,
    Checkboxes,
    CustomQuery,
}

/// Kind of a saved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QueryType {
    General,
    KrProgress,
    Widget,
}

/// A registered account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub timezone: Option<String>,
    /// `"sunday"` or `"monday"`
    pub week_start: String,
    pub is_admin: bool,
    pub is_disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Parsed week start with the Monday default.
    #[must_use]
    pub fn week_start(&self) -> waypoint_core::WeekStart {
        waypoint_core::WeekStart::from_str_or_default(&self.week_start)
    }
}

/// A lazily-created period scope.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TimePeriod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_type: PeriodType,
    pub year: i64,
    pub month: Option<i64>,
    pub week: Option<i64>,
    pub day: Option<i64>,
}

/// Scope tuple addressing one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodScope {
    pub year: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

impl PeriodScope {
    /// Yearly scope.
    #[must_use]
    pub const fn yearly(year: i64) -> Self {
        Self { year, month: None, week: None, day: None }
    }

    /// Monthly scope.
    #[must_use]
    pub const fn monthly(year: i64, month: i64) -> Self {
        Self { year, month: Some(month), week: None, day: None }
    }

    /// Weekly scope.
    #[must_use]
    pub const fn weekly(year: i64, week: i64) -> Self {
        Self { year, month: None, week: Some(week), day: None }
    }

    /// Daily scope.
    #[must_use]
    pub const fn daily(year: i64, month: i64, day: i64) -> Self {
        Self { year, month: Some(month), week: None, day: Some(day) }
    }
}

/// A task within one period.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_id: Uuid,
    pub title: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub sort_order: i64,
    /// Cumulative tracked time in milliseconds
    pub time_spent_ms: i64,
    /// Non-null iff the timer is currently running
    pub timer_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Tracked time including the currently running span, if any.
    #[must_use]
    pub fn effective_time_spent_ms(&self, now: DateTime<Utc>) -> i64 {
        let running = self
            .timer_started_at
            .map_or(0, |started| (now - started).num_milliseconds().max(0));
        self.time_spent_ms + running
    }
}

/// A user-defined label attached to tasks.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub color: String,
}

/// A yearly or monthly objective owning key results.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    pub id: Uuid,
    pub user_id: Uuid,
    pub level: ObjectiveLevel,
    pub year: i64,
    pub month: Option<i64>,
    pub title: String,
    pub weight: f64,
    pub parent_id: Option<Uuid>,
    pub sort_order: i64,
}

/// One checkbox within a checkbox-measured key result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckboxItem {
    pub id: String,
    pub label: String,
    pub completed: bool,
}

/// A measurable component of an objective.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KeyResult {
    pub id: Uuid,
    pub objective_id: Uuid,
    pub title: String,
    pub weight: f64,
    /// Authoritative for slider/checkboxes; cached last-observed for
    /// custom_query.
    pub score: f64,
    pub measurement: MeasurementType,
    /// JSON list of [`CheckboxItem`]s (checkboxes variant only)
    pub checkbox_items: Option<String>,
    pub progress_query_id: Option<Uuid>,
    pub progress_query_code: Option<String>,
    pub sort_order: i64,
}

impl KeyResult {
    /// Parsed checkbox items; malformed or absent JSON yields an empty list.
    #[must_use]
    pub fn checkbox_items(&self) -> Vec<CheckboxItem> {
        self.checkbox_items
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

/// A reusable script owned by a user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub code: String,
    pub query_type: QueryType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A dashboard widget referencing script output.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DashboardWidget {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub widget_type: String,
    /// JSON blob holding inline `code` or a `queryId` reference
    pub config: String,
    pub sort_order: i64,
    pub page: String,
}

/// A metrics template effective from a given date.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTemplate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub effective_from: NaiveDate,
    /// JSON list of metric definitions (parsed by the metrics engine)
    pub metrics_definition: String,
    pub created_at: DateTime<Utc>,
}

/// One stored metric value for (user, date, name).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricValue {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub metric_name: String,
    /// JSON-encoded value (number, string, or boolean)
    pub value: String,
    /// `"user"` for input/computed rows, plugin id for external rows
    pub source: String,
}

impl DailyMetricValue {
    /// The stored value as JSON.
    #[must_use]
    pub fn value_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.value).unwrap_or(serde_json::Value::Null)
    }
}

/// Per-user plugin connection state.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PluginConnection {
    pub user_id: Uuid,
    pub plugin_id: String,
    pub enabled: bool,
    /// Encrypted credential JSON (hex, nonce-prefixed); never serialized
    #[serde(skip_serializing)]
    pub credentials: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Audit row for one sandbox execution.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code_snippet: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A free-form reflection attached to a period.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A guiding principle.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Principle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub sort_order: i64,
}
