//! The capability surface scripts reach through `q`.
//!
//! [`DataApi`] is the only doorway from a running script to application
//! state. The host binds an implementation to the requesting user before
//! the run; scripts cannot name any other user.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use waypoint_core::TodayInfo;

use crate::value::Value;

/// Filters accepted by `q.daily`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyFilter {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub week: Option<i64>,
    /// Inclusive `YYYY-MM-DD` lower bound
    pub from: Option<String>,
    /// Inclusive `YYYY-MM-DD` upper bound
    pub to: Option<String>,
}

/// Filters accepted by `q.tasks`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQueryFilter {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub week: Option<i64>,
    pub completed: Option<bool>,
    pub tag: Option<String>,
    /// `"daily"` or `"weekly"`
    pub period_type: Option<String>,
    pub period_id: Option<String>,
}

/// Filters accepted by `q.objectives`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveFilter {
    pub year: Option<i64>,
    /// `"yearly"` or `"monthly"`
    pub level: Option<String>,
}

/// One day of flexible metrics as scripts see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    /// `YYYY-MM-DD`
    pub date: String,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub week: i64,
    /// Metric name -> value, external names as `pluginId.fieldId`
    pub metrics: BTreeMap<String, serde_json::Value>,
}

/// One task as scripts see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub time_spent_ms: i64,
    /// Parsed from the `expected_hours` attribute when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hours: Option<f64>,
    /// Parsed from the `progress` attribute when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub tags: Vec<String>,
    pub period_type: String,
    pub year: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

/// One key result as scripts see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResultRecord {
    pub id: String,
    pub title: String,
    pub weight: f64,
    pub score: f64,
    pub measurement: String,
}

/// One objective with its key results as scripts see it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveRecord {
    pub id: String,
    pub title: String,
    pub level: String,
    pub year: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<i64>,
    pub weight: f64,
    pub score: f64,
    pub key_results: Vec<KeyResultRecord>,
}

/// Data fetches available to scripts, bound to one user.
///
/// Implementations must never expose another user's rows; the sandbox has
/// no user parameter to pass.
#[async_trait]
pub trait DataApi: Send + Sync {
    /// Daily metric records, ascending by date.
    async fn daily(&self, filter: &DailyFilter) -> anyhow::Result<Vec<DailyRecord>>;

    /// Tasks with attributes and tag names resolved.
    async fn tasks(&self, filter: &TaskQueryFilter) -> anyhow::Result<Vec<TaskRecord>>;

    /// Objectives with key results inlined.
    async fn objectives(&self, filter: &ObjectiveFilter) -> anyhow::Result<Vec<ObjectiveRecord>>;

    /// Today in the user's timezone with their week numbering.
    fn today(&self) -> TodayInfo;
}

// ----------------------------------------------------------------------
// Filter parsing from script values
// ----------------------------------------------------------------------

fn opt_int(map: &BTreeMap<String, Value>, key: &str) -> Result<Option<i64>, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(*n as i64)),
        Some(other) => Err(format!("filter {key} must be a number, got {}", other.kind())),
    }
}

fn opt_str(map: &BTreeMap<String, Value>, key: &str) -> Result<Option<String>, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("filter {key} must be a string, got {}", other.kind())),
    }
}

fn opt_bool(map: &BTreeMap<String, Value>, key: &str) -> Result<Option<bool>, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(format!("filter {key} must be a boolean, got {}", other.kind())),
    }
}

fn as_filter_map(value: Option<&Value>) -> Result<BTreeMap<String, Value>, String> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Map(entries)) => Ok(entries.clone()),
        Some(other) => Err(format!("filters must be a map, got {}", other.kind())),
    }
}

impl DailyFilter {
    /// Parse from the optional first argument of `q.daily`.
    ///
    /// # Errors
    /// Returns a message naming the offending key.
    pub fn from_arg(value: Option<&Value>) -> Result<Self, String> {
        let map = as_filter_map(value)?;
        Ok(Self {
            year: opt_int(&map, "year")?,
            month: opt_int(&map, "month")?,
            week: opt_int(&map, "week")?,
            from: opt_str(&map, "from")?,
            to: opt_str(&map, "to")?,
        })
    }
}

impl TaskQueryFilter {
    /// Parse from the optional first argument of `q.tasks`.
    ///
    /// # Errors
    /// Returns a message naming the offending key.
    pub fn from_arg(value: Option<&Value>) -> Result<Self, String> {
        let map = as_filter_map(value)?;
        let period_type = opt_str(&map, "periodType")?;
        if let Some(ref pt) = period_type {
            if pt != "daily" && pt != "weekly" {
                return Err(format!("filter periodType must be daily or weekly, got {pt:?}"));
            }
        }
        Ok(Self {
            year: opt_int(&map, "year")?,
            month: opt_int(&map, "month")?,
            week: opt_int(&map, "week")?,
            completed: opt_bool(&map, "completed")?,
            tag: opt_str(&map, "tag")?,
            period_type,
            period_id: opt_str(&map, "periodId")?,
        })
    }
}

impl ObjectiveFilter {
    /// Parse from the optional first argument of `q.objectives`.
    ///
    /// # Errors
    /// Returns a message naming the offending key.
    pub fn from_arg(value: Option<&Value>) -> Result<Self, String> {
        let map = as_filter_map(value)?;
        let level = opt_str(&map, "level")?;
        if let Some(ref l) = level {
            if l != "yearly" && l != "monthly" {
                return Err(format!("filter level must be yearly or monthly, got {l:?}"));
            }
        }
        Ok(Self {
            year: opt_int(&map, "year")?,
            level,
        })
    }
}

/// Convert any serializable record list into script values.
pub(crate) fn records_to_value<T: Serialize>(records: &[T]) -> Value {
    let json = serde_json::to_value(records).unwrap_or(serde_json::Value::Array(vec![]));
    Value::from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_filter_parsing() {
        let mut map = BTreeMap::new();
        map.insert("year".to_string(), Value::Number(2025.0));
        map.insert("from".to_string(), Value::Str("2025-03-14".into()));
        let filter = DailyFilter::from_arg(Some(&Value::Map(map))).expect("parse");
        assert_eq!(filter.year, Some(2025));
        assert_eq!(filter.from.as_deref(), Some("2025-03-14"));
        assert_eq!(filter.week, None);
    }

    #[test]
    fn test_missing_filter_is_default() {
        assert_eq!(DailyFilter::from_arg(None).expect("parse"), DailyFilter::default());
        assert_eq!(
            TaskQueryFilter::from_arg(Some(&Value::Null)).expect("parse"),
            TaskQueryFilter::default()
        );
    }

    #[test]
    fn test_bad_filter_types_are_errors() {
        let mut map = BTreeMap::new();
        map.insert("year".to_string(), Value::Str("twenty".into()));
        assert!(DailyFilter::from_arg(Some(&Value::Map(map))).is_err());

        let mut map = BTreeMap::new();
        map.insert("periodType".to_string(), Value::Str("hourly".into()));
        assert!(TaskQueryFilter::from_arg(Some(&Value::Map(map))).is_err());

        assert!(ObjectiveFilter::from_arg(Some(&Value::Number(3.0))).is_err());
    }
}
