//! Day-level metric evaluation and writes.
//!
//! Reads never fetch from plugins: external rows are whatever the last sync
//! wrote. Writes accept input values only, then re-derive and persist
//! computed rows so subsequent reads are cheap.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use waypoint_core::ApiError;
use waypoint_store::{metric_values, templates, MetricsTemplate};

use crate::definition::{
    parse_definitions, topological_computed, MetricDefinition, MetricType,
};
use crate::expr::Expr;

/// The resolved metrics of one (user, date).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayMetrics {
    /// Definitions of the active template, in display order; empty when no
    /// template is active.
    pub metrics: Vec<MetricDefinition>,
    /// name -> resolved value (null when absent)
    pub values: BTreeMap<String, serde_json::Value>,
    /// name -> evaluation error for this day
    pub errors: BTreeMap<String, String>,
    /// Name of the active template, if any
    pub template: Option<String>,
}

impl DayMetrics {
    fn empty() -> Self {
        Self {
            metrics: Vec::new(),
            values: BTreeMap::new(),
            errors: BTreeMap::new(),
            template: None,
        }
    }
}

/// Evaluate the metrics of one day.
///
/// # Errors
/// Returns an error on store failure or a corrupt template column.
pub async fn evaluate_day(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<DayMetrics, ApiError> {
    let Some(template) = templates::active_for_date(pool, user_id, date).await? else {
        return Ok(DayMetrics::empty());
    };

    let defs = definitions_of(&template)?;
    let persisted = persisted_values(pool, user_id, date).await?;

    Ok(resolve(&template, defs, &persisted))
}

/// Write input values for one day and re-derive computed rows.
///
/// Only metrics of type `input` in the active template are accepted; a null
/// value clears the stored row. External rows are out of band (plugin sync
/// owns them) and computed rows are re-persisted here.
///
/// # Errors
/// Returns `Validation` for unknown or non-input names, `NotFound` when no
/// template is active.
pub async fn put_values(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
    inputs: &BTreeMap<String, serde_json::Value>,
) -> Result<DayMetrics, ApiError> {
    let Some(template) = templates::active_for_date(pool, user_id, date).await? else {
        return Err(ApiError::NotFound("active metrics template".into()));
    };
    let defs = definitions_of(&template)?;

    for name in inputs.keys() {
        let def = defs.iter().find(|def| &def.name == name);
        match def {
            Some(def) if def.metric_type == MetricType::Input => {}
            Some(_) => {
                return Err(ApiError::Validation(format!(
                    "metric {name:?} is not an input metric"
                )));
            }
            None => {
                return Err(ApiError::Validation(format!(
                    "metric {name:?} is not in the active template"
                )));
            }
        }
    }

    for (name, value) in inputs {
        if value.is_null() {
            metric_values::delete(pool, user_id, date, name).await?;
        } else {
            metric_values::upsert(pool, user_id, date, name, value, "user").await?;
        }
    }

    // Re-derive computed rows from the fresh state and persist them so reads
    // don't re-evaluate.
    let persisted = persisted_values(pool, user_id, date).await?;
    let day = resolve(&template, defs, &persisted);

    for def in &day.metrics {
        if def.metric_type != MetricType::Computed {
            continue;
        }
        let value = day.values.get(&def.name).cloned().unwrap_or(serde_json::Value::Null);
        if value.is_null() {
            metric_values::delete(pool, user_id, date, &def.name).await?;
        } else {
            metric_values::upsert(pool, user_id, date, &def.name, &value, "user").await?;
        }
    }

    debug!(user_id = %user_id, %date, inputs = inputs.len(), "Wrote day metrics");
    Ok(day)
}

fn definitions_of(template: &MetricsTemplate) -> Result<Vec<MetricDefinition>, ApiError> {
    parse_definitions(&template.metrics_definition).map_err(|e| {
        ApiError::Internal(anyhow::anyhow!(
            "template {} has a corrupt definition column: {e}",
            template.id
        ))
    })
}

async fn persisted_values(
    pool: &SqlitePool,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<HashMap<String, serde_json::Value>, ApiError> {
    let rows = metric_values::for_date(pool, user_id, date).await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.metric_name.clone(), row.value_json()))
        .collect())
}

/// Pure resolution step shared by reads and writes.
fn resolve(
    template: &MetricsTemplate,
    defs: Vec<MetricDefinition>,
    persisted: &HashMap<String, serde_json::Value>,
) -> DayMetrics {
    let mut values: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let mut errors: BTreeMap<String, String> = BTreeMap::new();

    // Inputs and externals first: they are leaves for computed expressions.
    for def in &defs {
        match def.metric_type {
            MetricType::Input => {
                values.insert(
                    def.name.clone(),
                    persisted.get(&def.name).cloned().unwrap_or(serde_json::Value::Null),
                );
            }
            MetricType::External => {
                // External rows are stored under their pluginId.fieldId name.
                let value = match def.source.as_deref() {
                    Some(source) => persisted.get(source).cloned().unwrap_or(serde_json::Value::Null),
                    None => {
                        errors.insert(def.name.clone(), "missing external source".into());
                        serde_json::Value::Null
                    }
                };
                values.insert(def.name.clone(), value);
            }
            MetricType::Computed => {}
        }
    }

    // Computed metrics in dependency order over the accumulating environment.
    match topological_computed(&defs) {
        Ok(ordered) => {
            let mut env: HashMap<String, serde_json::Value> =
                values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

            for def in ordered {
                let result = def
                    .expression
                    .as_deref()
                    .ok_or_else(|| "missing expression".to_string())
                    .and_then(|text| Expr::parse(text).map_err(|e| e.to_string()))
                    .and_then(|expr| expr.eval(&env).map_err(|e| e.to_string()));

                match result {
                    Ok(value) => {
                        env.insert(def.name.clone(), value.clone());
                        values.insert(def.name.clone(), value);
                    }
                    Err(message) => {
                        errors.insert(def.name.clone(), message);
                        env.insert(def.name.clone(), serde_json::Value::Null);
                        values.insert(def.name.clone(), serde_json::Value::Null);
                    }
                }
            }
        }
        Err(e) => {
            // Cycles are rejected at save time; a stored cycle means the
            // column was edited out of band.
            errors.insert("__template".into(), e.to_string());
        }
    }

    DayMetrics {
        metrics: defs,
        values,
        errors,
        template: Some(template.name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_store::{test_pool, users};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    async fn user(pool: &SqlitePool) -> Uuid {
        users::create(
            pool,
            users::NewUser {
                username: "ada".into(),
                display_name: "Ada".into(),
                timezone: None,
                week_start: "monday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user")
        .id
    }

    const SLEEP_TEMPLATE: &str = r#"[
        {"name":"sleep","label":"Sleep","metricType":"input","inputType":"time"},
        {"name":"sleepHours","label":"Sleep hours","metricType":"computed",
         "expression":"parseTime(sleep) / 60"},
        {"name":"steps","label":"Steps","metricType":"external","source":"fitbit.steps"}
    ]"#;

    #[tokio::test]
    async fn test_no_active_template_is_empty() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;

        let day = evaluate_day(&pool, user_id, date(2025, 3, 14))
            .await
            .expect("evaluate");
        assert!(day.metrics.is_empty());
        assert!(day.template.is_none());
    }

    #[tokio::test]
    async fn test_input_write_derives_computed() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        templates::create(&pool, user_id, "default", date(2025, 1, 1), SLEEP_TEMPLATE)
            .await
            .expect("create template");

        let mut inputs = BTreeMap::new();
        inputs.insert("sleep".to_string(), json!("07:30"));
        let written = put_values(&pool, user_id, date(2025, 3, 14), &inputs)
            .await
            .expect("put values");

        assert_eq!(written.values.get("sleep"), Some(&json!("07:30")));
        assert_eq!(written.values.get("sleepHours"), Some(&json!(7.5)));

        // The computed row is persisted, and a fresh read agrees.
        let day = evaluate_day(&pool, user_id, date(2025, 3, 14))
            .await
            .expect("evaluate");
        assert_eq!(day.values.get("sleepHours"), Some(&json!(7.5)));
        assert!(day.errors.is_empty());

        let rows = metric_values::for_date(&pool, user_id, date(2025, 3, 14))
            .await
            .expect("rows");
        assert!(rows.iter().any(|r| r.metric_name == "sleepHours" && r.source == "user"));
    }

    #[tokio::test]
    async fn test_external_metric_reads_synced_row() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        templates::create(&pool, user_id, "default", date(2025, 1, 1), SLEEP_TEMPLATE)
            .await
            .expect("create template");

        // Simulate a sync having written the external row.
        metric_values::upsert(
            &pool,
            user_id,
            date(2025, 3, 14),
            "fitbit.steps",
            &json!(10234),
            "fitbit",
        )
        .await
        .expect("upsert external");

        let day = evaluate_day(&pool, user_id, date(2025, 3, 14))
            .await
            .expect("evaluate");
        assert_eq!(day.values.get("steps"), Some(&json!(10234)));
    }

    #[tokio::test]
    async fn test_missing_values_are_null() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        templates::create(&pool, user_id, "default", date(2025, 1, 1), SLEEP_TEMPLATE)
            .await
            .expect("create template");

        let day = evaluate_day(&pool, user_id, date(2025, 3, 14))
            .await
            .expect("evaluate");
        assert_eq!(day.values.get("sleep"), Some(&serde_json::Value::Null));
        // Null input propagates through the computed expression.
        assert_eq!(day.values.get("sleepHours"), Some(&serde_json::Value::Null));
        assert!(day.errors.is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_non_input_names() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        templates::create(&pool, user_id, "default", date(2025, 1, 1), SLEEP_TEMPLATE)
            .await
            .expect("create template");

        let mut inputs = BTreeMap::new();
        inputs.insert("sleepHours".to_string(), json!(9.0));
        let err = put_values(&pool, user_id, date(2025, 3, 14), &inputs)
            .await
            .expect_err("should reject computed write");
        assert!(matches!(err, ApiError::Validation(_)));

        let mut inputs = BTreeMap::new();
        inputs.insert("unknown".to_string(), json!(1));
        let err = put_values(&pool, user_id, date(2025, 3, 14), &inputs)
            .await
            .expect_err("should reject unknown write");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_expression_error_is_reported_per_metric() {
        let pool = test_pool().await;
        let user_id = user(&pool).await;
        let template = r#"[
            {"name":"a","label":"A","metricType":"input","inputType":"number"},
            {"name":"broken","label":"Broken","metricType":"computed","expression":"a / 0"}
        ]"#;
        templates::create(&pool, user_id, "default", date(2025, 1, 1), template)
            .await
            .expect("create template");

        let mut inputs = BTreeMap::new();
        inputs.insert("a".to_string(), json!(4));
        let day = put_values(&pool, user_id, date(2025, 3, 14), &inputs)
            .await
            .expect("put values");

        assert!(day.errors.contains_key("broken"));
        assert_eq!(day.values.get("broken"), Some(&serde_json::Value::Null));
    }
}
