//! Whole-profile export and import.
//!
//! Export produces a single JSON document with every per-user row. Import is
//! transactional, remaps ids to fresh UUIDs, and fails closed on schema
//! version mismatch. Plugin credentials are never exported.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    MeasurementType, ObjectiveLevel, PeriodType, QueryType,
};
use crate::{metric_values, objectives, periods, queries, reflections, tags, tasks, templates,
            users, widgets};

/// Current export document version.
pub const SCHEMA_VERSION: u32 = 1;

/// One exported task with its attributes and tag names inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTask {
    pub id: Uuid,
    pub period_id: Uuid,
    pub title: String,
    pub completed: bool,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub sort_order: i64,
    pub time_spent_ms: i64,
    pub timer_started_at: Option<chrono::DateTime<Utc>>,
    pub attributes: HashMap<String, String>,
    pub tags: Vec<String>,
}

/// One exported period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedPeriod {
    pub id: Uuid,
    pub period_type: PeriodType,
    pub year: i64,
    pub month: Option<i64>,
    pub week: Option<i64>,
    pub day: Option<i64>,
}

/// One exported objective with its key results inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedObjective {
    pub id: Uuid,
    pub level: ObjectiveLevel,
    pub year: i64,
    pub month: Option<i64>,
    pub title: String,
    pub weight: f64,
    /// Parent objective id in the exporting store's id space
    pub parent_id: Option<Uuid>,
    pub sort_order: i64,
    pub key_results: Vec<ExportedKeyResult>,
}

/// One exported key result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKeyResult {
    pub title: String,
    pub weight: f64,
    pub score: f64,
    pub measurement: MeasurementType,
    pub checkbox_items: Option<String>,
    pub progress_query_id: Option<Uuid>,
    pub progress_query_code: Option<String>,
    pub sort_order: i64,
}

/// One exported saved query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedQuery {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub query_type: QueryType,
}

/// One exported metric value row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMetricValue {
    pub date: NaiveDate,
    pub metric_name: String,
    pub value: serde_json::Value,
    pub source: String,
}

/// The whole-profile document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub schema_version: u32,
    pub username: String,
    pub display_name: String,
    pub timezone: Option<String>,
    pub week_start: String,
    pub periods: Vec<ExportedPeriod>,
    pub tasks: Vec<ExportedTask>,
    pub tags: Vec<ExportedTag>,
    pub objectives: Vec<ExportedObjective>,
    pub saved_queries: Vec<ExportedQuery>,
    pub widgets: Vec<ExportedWidget>,
    pub templates: Vec<ExportedTemplate>,
    pub metric_values: Vec<ExportedMetricValue>,
    pub reflections: Vec<ExportedReflection>,
    pub principles: Vec<ExportedPrinciple>,
}

/// One exported tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTag {
    pub name: String,
    pub color: String,
}

/// One exported widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedWidget {
    pub title: String,
    pub widget_type: String,
    pub config: String,
    pub sort_order: i64,
    pub page: String,
}

/// One exported metrics template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTemplate {
    pub name: String,
    pub effective_from: NaiveDate,
    pub metrics_definition: String,
}

/// One exported reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedReflection {
    pub period_id: Uuid,
    pub content: String,
}

/// One exported principle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedPrinciple {
    pub title: String,
    pub description: String,
    pub sort_order: i64,
}

/// Export every per-user row into one document.
///
/// # Errors
/// Returns error on database failure or missing user.
pub async fn export_user(pool: &SqlitePool, user_id: Uuid) -> StoreResult<ExportDocument> {
    let user = users::get(pool, user_id).await?;

    let period_rows = periods::list_all(pool, user_id).await?;
    let task_rows = tasks::list_filtered(pool, user_id, &tasks::TaskFilter::default()).await?;
    let attributes = tasks::attributes_for_user(pool, user_id).await?;
    let tag_links = tasks::tag_names_for_user(pool, user_id).await?;
    let tag_rows = tags::list(pool, user_id).await?;
    let objective_rows = objectives::list(pool, user_id, None, None).await?;
    let query_rows = queries::list(pool, user_id).await?;
    let widget_rows = widgets::list(pool, user_id).await?;
    let template_rows = templates::list(pool, user_id).await?;
    let value_rows = metric_values::list_all(pool, user_id).await?;
    let reflection_rows = reflections::list_reflections(pool, user_id).await?;
    let principle_rows = reflections::list_principles(pool, user_id).await?;

    let mut exported_objectives = Vec::with_capacity(objective_rows.len());
    for objective in objective_rows {
        let krs = objectives::krs_for_objective(pool, objective.id).await?;
        exported_objectives.push(ExportedObjective {
            id: objective.id,
            level: objective.level,
            year: objective.year,
            month: objective.month,
            title: objective.title,
            weight: objective.weight,
            parent_id: objective.parent_id,
            sort_order: objective.sort_order,
            key_results: krs
                .into_iter()
                .map(|kr| ExportedKeyResult {
                    title: kr.title,
                    weight: kr.weight,
                    score: kr.score,
                    measurement: kr.measurement,
                    checkbox_items: kr.checkbox_items,
                    progress_query_id: kr.progress_query_id,
                    progress_query_code: kr.progress_query_code,
                    sort_order: kr.sort_order,
                })
                .collect(),
        });
    }

    Ok(ExportDocument {
        schema_version: SCHEMA_VERSION,
        username: user.username,
        display_name: user.display_name,
        timezone: user.timezone,
        week_start: user.week_start,
        periods: period_rows
            .into_iter()
            .map(|p| ExportedPeriod {
                id: p.id,
                period_type: p.period_type,
                year: p.year,
                month: p.month,
                week: p.week,
                day: p.day,
            })
            .collect(),
        tasks: task_rows
            .into_iter()
            .map(|t| ExportedTask {
                id: t.id,
                period_id: t.period_id,
                title: t.title,
                completed: t.completed,
                completed_at: t.completed_at,
                sort_order: t.sort_order,
                time_spent_ms: t.time_spent_ms,
                timer_started_at: t.timer_started_at,
                attributes: attributes.get(&t.id).cloned().unwrap_or_default(),
                tags: tag_links.get(&t.id).cloned().unwrap_or_default(),
            })
            .collect(),
        tags: tag_rows
            .into_iter()
            .map(|t| ExportedTag {
                name: t.name,
                color: t.color,
            })
            .collect(),
        objectives: exported_objectives,
        saved_queries: query_rows
            .into_iter()
            .map(|q| ExportedQuery {
                id: q.id,
                name: q.name,
                code: q.code,
                query_type: q.query_type,
            })
            .collect(),
        widgets: widget_rows
            .into_iter()
            .map(|w| ExportedWidget {
                title: w.title,
                widget_type: w.widget_type,
                config: w.config,
                sort_order: w.sort_order,
                page: w.page,
            })
            .collect(),
        templates: template_rows
            .into_iter()
            .map(|t| ExportedTemplate {
                name: t.name,
                effective_from: t.effective_from,
                metrics_definition: t.metrics_definition,
            })
            .collect(),
        metric_values: value_rows
            .into_iter()
            .map(|v| ExportedMetricValue {
                date: v.date,
                metric_name: v.metric_name.clone(),
                value: v.value_json(),
                source: v.source,
            })
            .collect(),
        reflections: reflection_rows
            .into_iter()
            .map(|r| ExportedReflection {
                period_id: r.period_id,
                content: r.content,
            })
            .collect(),
        principles: principle_rows
            .into_iter()
            .map(|p| ExportedPrinciple {
                title: p.title,
                description: p.description,
                sort_order: p.sort_order,
            })
            .collect(),
    })
}

/// Import a document into a fresh user, remapping every id.
///
/// The whole import runs in one transaction; any failure rolls back.
///
/// # Errors
/// Returns `Conflict` on schema version mismatch or username collision.
pub async fn import_user(pool: &SqlitePool, doc: &ExportDocument) -> StoreResult<Uuid> {
    if doc.schema_version != SCHEMA_VERSION {
        return Err(StoreError::Conflict(format!(
            "unsupported export schema version {} (expected {SCHEMA_VERSION})",
            doc.schema_version
        )));
    }

    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let user_id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO users (id, username, display_name, timezone, week_start, is_admin, is_disabled, created_at)
        VALUES (?, ?, ?, ?, ?, 0, 0, ?)
        ",
    )
    .bind(user_id)
    .bind(&doc.username)
    .bind(&doc.display_name)
    .bind(&doc.timezone)
    .bind(&doc.week_start)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // Periods first: tasks and reflections reference them.
    let mut period_ids: HashMap<Uuid, Uuid> = HashMap::new();
    for period in &doc.periods {
        let new_id = Uuid::new_v4();
        period_ids.insert(period.id, new_id);
        sqlx::query(
            r"
            INSERT INTO time_periods (id, user_id, period_type, year, month, week, day)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new_id)
        .bind(user_id)
        .bind(period.period_type)
        .bind(period.year)
        .bind(period.month)
        .bind(period.week)
        .bind(period.day)
        .execute(&mut *tx)
        .await?;
    }

    let mut tag_ids: HashMap<String, Uuid> = HashMap::new();
    for tag in &doc.tags {
        let new_id = Uuid::new_v4();
        tag_ids.insert(tag.name.clone(), new_id);
        sqlx::query("INSERT INTO tags (id, user_id, name, color) VALUES (?, ?, ?, ?)")
            .bind(new_id)
            .bind(user_id)
            .bind(&tag.name)
            .bind(&tag.color)
            .execute(&mut *tx)
            .await?;
    }

    for task in &doc.tasks {
        let period_id = period_ids
            .get(&task.period_id)
            .copied()
            .ok_or(StoreError::NotFound("imported task period"))?;
        let new_id = Uuid::new_v4();
        sqlx::query(
            r"
            INSERT INTO tasks (id, user_id, period_id, title, completed, completed_at,
                               sort_order, time_spent_ms, timer_started_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new_id)
        .bind(user_id)
        .bind(period_id)
        .bind(&task.title)
        .bind(task.completed)
        .bind(task.completed_at)
        .bind(task.sort_order)
        .bind(task.time_spent_ms)
        .bind(task.timer_started_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (key, value) in &task.attributes {
            sqlx::query("INSERT INTO task_attributes (task_id, key, value) VALUES (?, ?, ?)")
                .bind(new_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        for tag_name in &task.tags {
            if let Some(tag_id) = tag_ids.get(tag_name) {
                sqlx::query("INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?, ?)")
                    .bind(new_id)
                    .bind(tag_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }

    // Saved queries before key results so progress references can remap.
    let mut query_ids: HashMap<Uuid, Uuid> = HashMap::new();
    for query in &doc.saved_queries {
        let new_id = Uuid::new_v4();
        query_ids.insert(query.id, new_id);
        sqlx::query(
            r"
            INSERT INTO saved_queries (id, user_id, name, code, query_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new_id)
        .bind(user_id)
        .bind(&query.name)
        .bind(&query.code)
        .bind(query.query_type)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    // Objectives insert with a NULL parent first; the hierarchy is rewired
    // in a second pass once every objective has its remapped id, so parent
    // order in the document doesn't matter.
    let mut objective_ids: HashMap<Uuid, Uuid> = HashMap::new();
    for objective in &doc.objectives {
        let objective_id = Uuid::new_v4();
        objective_ids.insert(objective.id, objective_id);
        sqlx::query(
            r"
            INSERT INTO objectives (id, user_id, level, year, month, title, weight, parent_id, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ",
        )
        .bind(objective_id)
        .bind(user_id)
        .bind(objective.level)
        .bind(objective.year)
        .bind(objective.month)
        .bind(&objective.title)
        .bind(objective.weight)
        .bind(objective.sort_order)
        .execute(&mut *tx)
        .await?;

        for kr in &objective.key_results {
            let progress_query_id = kr
                .progress_query_id
                .and_then(|old| query_ids.get(&old).copied());
            sqlx::query(
                r"
                INSERT INTO key_results (id, objective_id, title, weight, score, measurement,
                                         checkbox_items, progress_query_id, progress_query_code, sort_order)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(Uuid::new_v4())
            .bind(objective_id)
            .bind(&kr.title)
            .bind(kr.weight)
            .bind(kr.score)
            .bind(kr.measurement)
            .bind(&kr.checkbox_items)
            .bind(progress_query_id)
            .bind(&kr.progress_query_code)
            .bind(kr.sort_order)
            .execute(&mut *tx)
            .await?;
        }
    }

    for objective in &doc.objectives {
        let Some(old_parent) = objective.parent_id else {
            continue;
        };
        // A parent outside the document (dangling reference) stays NULL.
        let Some(new_parent) = objective_ids.get(&old_parent).copied() else {
            continue;
        };
        let new_id = objective_ids
            .get(&objective.id)
            .copied()
            .ok_or(StoreError::NotFound("imported objective"))?;
        sqlx::query("UPDATE objectives SET parent_id = ? WHERE id = ?")
            .bind(new_parent)
            .bind(new_id)
            .execute(&mut *tx)
            .await?;
    }

    for widget in &doc.widgets {
        sqlx::query(
            r"
            INSERT INTO dashboard_widgets (id, user_id, title, widget_type, config, sort_order, page)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&widget.title)
        .bind(&widget.widget_type)
        .bind(&widget.config)
        .bind(widget.sort_order)
        .bind(&widget.page)
        .execute(&mut *tx)
        .await?;
    }

    for template in &doc.templates {
        sqlx::query(
            r"
            INSERT INTO metrics_templates (id, user_id, name, effective_from, metrics_definition, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&template.name)
        .bind(template.effective_from)
        .bind(&template.metrics_definition)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    for value in &doc.metric_values {
        sqlx::query(
            r"
            INSERT INTO daily_metric_values (user_id, date, metric_name, value, source)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(user_id)
        .bind(value.date)
        .bind(&value.metric_name)
        .bind(value.value.to_string())
        .bind(&value.source)
        .execute(&mut *tx)
        .await?;
    }

    for reflection in &doc.reflections {
        let period_id = period_ids
            .get(&reflection.period_id)
            .copied()
            .ok_or(StoreError::NotFound("imported reflection period"))?;
        sqlx::query(
            r"
            INSERT INTO reflections (id, user_id, period_id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(period_id)
        .bind(&reflection.content)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    for principle in &doc.principles {
        sqlx::query(
            "INSERT INTO principles (id, user_id, title, description, sort_order) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&principle.title)
        .bind(&principle.description)
        .bind(principle.sort_order)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(user_id = %user_id, username = %doc.username, "Imported profile");
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeriodScope;
    use crate::{test_pool, users};
    use serde_json::json;

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let pool = test_pool().await;
        let user = users::create(
            &pool,
            users::NewUser {
                username: "ada".into(),
                display_name: "Ada".into(),
                timezone: Some("America/New_York".into()),
                week_start: "sunday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user");

        let period = periods::get_or_create(
            &pool,
            user.id,
            PeriodType::Weekly,
            PeriodScope::weekly(2025, 12),
        )
        .await
        .expect("create period");

        let task = tasks::create(
            &pool,
            tasks::NewTask {
                user_id: user.id,
                period_id: period.id,
                title: "Review goals".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create task");
        tasks::set_attribute(&pool, task.id, "expected_hours", "1.5")
            .await
            .expect("set attribute");

        let tag = tags::create(&pool, user.id, "focus", "#f00").await.expect("create tag");
        tasks::add_tag(&pool, task.id, tag.id).await.expect("tag task");

        // A small hierarchy with explicit ordering: a yearly parent holding
        // two deliberately re-ordered KRs, and a monthly child under it.
        let parent = objectives::create(
            &pool,
            objectives::NewObjective {
                user_id: user.id,
                level: ObjectiveLevel::Yearly,
                year: 2025,
                month: None,
                title: "Get fit".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create parent objective");
        let child = objectives::create(
            &pool,
            objectives::NewObjective {
                user_id: user.id,
                level: ObjectiveLevel::Monthly,
                year: 2025,
                month: Some(3),
                title: "March training block".into(),
                weight: 1.0,
                parent_id: Some(parent.id),
            },
        )
        .await
        .expect("create child objective");
        sqlx::query("UPDATE objectives SET sort_order = ? WHERE id = ?")
            .bind(1_i64)
            .bind(parent.id)
            .execute(&pool)
            .await
            .expect("set parent sort order");
        sqlx::query("UPDATE objectives SET sort_order = ? WHERE id = ?")
            .bind(2_i64)
            .bind(child.id)
            .execute(&pool)
            .await
            .expect("set child sort order");

        // Created out of display order; sort_order carries the real order.
        let second_kr = objectives::create_kr(
            &pool,
            objectives::NewKeyResult {
                objective_id: parent.id,
                title: "Run 500 km".into(),
                weight: 1.0,
                measurement: MeasurementType::Slider,
                checkbox_items: None,
                progress_query_id: None,
                progress_query_code: None,
            },
        )
        .await
        .expect("create kr");
        let first_kr = objectives::create_kr(
            &pool,
            objectives::NewKeyResult {
                objective_id: parent.id,
                title: "Base mileage".into(),
                weight: 1.0,
                measurement: MeasurementType::Slider,
                checkbox_items: None,
                progress_query_id: None,
                progress_query_code: None,
            },
        )
        .await
        .expect("create kr");
        sqlx::query("UPDATE key_results SET sort_order = ? WHERE id = ?")
            .bind(2_i64)
            .bind(second_kr.id)
            .execute(&pool)
            .await
            .expect("set kr sort order");
        sqlx::query("UPDATE key_results SET sort_order = ? WHERE id = ?")
            .bind(1_i64)
            .bind(first_kr.id)
            .execute(&pool)
            .await
            .expect("set kr sort order");

        metric_values::upsert(
            &pool,
            user.id,
            NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date"),
            "fitbit.steps",
            &json!(10234),
            "fitbit",
        )
        .await
        .expect("upsert value");

        let mut doc = export_user(&pool, user.id).await.expect("export");
        assert_eq!(doc.schema_version, SCHEMA_VERSION);
        assert_eq!(doc.tasks.len(), 1);
        assert_eq!(doc.tasks[0].tags, vec!["focus".to_string()]);

        // Put the child ahead of its parent so the import's parent rewiring
        // is exercised independent of document order.
        doc.objectives.reverse();

        // Import into a fresh store.
        let fresh = test_pool().await;
        let new_user_id = import_user(&fresh, &doc).await.expect("import");
        assert_ne!(new_user_id, user.id);

        let round_tripped = export_user(&fresh, new_user_id).await.expect("re-export");
        assert_eq!(round_tripped.username, doc.username);
        assert_eq!(round_tripped.periods.len(), doc.periods.len());
        assert_eq!(round_tripped.tasks.len(), doc.tasks.len());
        assert_eq!(round_tripped.tasks[0].attributes, doc.tasks[0].attributes);
        assert_eq!(round_tripped.objectives.len(), doc.objectives.len());
        assert_eq!(round_tripped.metric_values.len(), doc.metric_values.len());
        assert_eq!(round_tripped.metric_values[0].value, json!(10234));

        // The hierarchy survives under remapped ids.
        let new_parent = round_tripped
            .objectives
            .iter()
            .find(|o| o.title == "Get fit")
            .expect("parent present");
        let new_child = round_tripped
            .objectives
            .iter()
            .find(|o| o.title == "March training block")
            .expect("child present");
        assert_eq!(new_child.parent_id, Some(new_parent.id));
        assert_ne!(new_parent.id, parent.id);

        // Objective and KR ordering survive.
        assert_eq!(new_parent.sort_order, 1);
        assert_eq!(new_child.sort_order, 2);
        let kr_titles: Vec<&str> = new_parent
            .key_results
            .iter()
            .map(|kr| kr.title.as_str())
            .collect();
        assert_eq!(kr_titles, vec!["Base mileage", "Run 500 km"]);
        assert_eq!(
            new_parent
                .key_results
                .iter()
                .map(|kr| kr.sort_order)
                .collect::<Vec<i64>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_import_rejects_wrong_schema_version() {
        let pool = test_pool().await;
        let doc = ExportDocument {
            schema_version: 99,
            username: "ghost".into(),
            display_name: String::new(),
            timezone: None,
            week_start: "monday".into(),
            periods: vec![],
            tasks: vec![],
            tags: vec![],
            objectives: vec![],
            saved_queries: vec![],
            widgets: vec![],
            templates: vec![],
            metric_values: vec![],
            reflections: vec![],
            principles: vec![],
        };

        let err = import_user(&pool, &doc).await.expect_err("should reject");
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
