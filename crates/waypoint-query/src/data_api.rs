//! Store-backed implementation of the sandbox capability surface.
//!
//! Bound to one user at construction; every query it issues is scoped to
//! that user's rows.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;
use uuid::Uuid;

use waypoint_core::{week_number, TodayInfo, WeekStart};
use waypoint_sandbox::{
    DailyFilter, DailyRecord, DataApi, ObjectiveFilter, ObjectiveRecord, TaskQueryFilter,
    TaskRecord,
};
use waypoint_store::{
    metric_values, objectives, periods, tasks, ObjectiveLevel, PeriodType, TimePeriod, User,
};

/// Capability bundle over the store, scoped to one user.
pub struct StoreDataApi {
    pool: SqlitePool,
    user: User,
    week_start: WeekStart,
}

impl StoreDataApi {
    /// Bind the capability surface to a user.
    #[must_use]
    pub fn new(pool: SqlitePool, user: User) -> Self {
        let week_start = user.week_start();
        Self {
            pool,
            user,
            week_start,
        }
    }
}

#[async_trait]
impl DataApi for StoreDataApi {
    async fn daily(&self, filter: &DailyFilter) -> anyhow::Result<Vec<DailyRecord>> {
        // Pull the widest range the filter allows, then shape per day.
        let (from, to) = range_bounds(filter)?;
        let rows = metric_values::for_range(&self.pool, self.user.id, from, to).await?;

        let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, serde_json::Value>> =
            BTreeMap::new();
        for row in rows {
            by_date
                .entry(row.date)
                .or_default()
                .insert(row.metric_name.clone(), row.value_json());
        }

        let mut records = Vec::with_capacity(by_date.len());
        for (date, metrics) in by_date {
            let week = i64::from(week_number(date, self.week_start));
            if let Some(year) = filter.year {
                if i64::from(date.year()) != year {
                    continue;
                }
            }
            if let Some(month) = filter.month {
                if i64::from(date.month()) != month {
                    continue;
                }
            }
            if let Some(filter_week) = filter.week {
                if week != filter_week {
                    continue;
                }
            }
            records.push(DailyRecord {
                date: date.format("%Y-%m-%d").to_string(),
                year: i64::from(date.year()),
                month: i64::from(date.month()),
                day: i64::from(date.day()),
                week,
                metrics,
            });
        }
        Ok(records)
    }

    async fn tasks(&self, filter: &TaskQueryFilter) -> anyhow::Result<Vec<TaskRecord>> {
        let store_filter = tasks::TaskFilter {
            year: filter.year,
            month: filter.month,
            week: filter.week,
            completed: filter.completed,
            period_type: match filter.period_type.as_deref() {
                Some("daily") => Some(PeriodType::Daily),
                Some("weekly") => Some(PeriodType::Weekly),
                _ => None,
            },
            period_id: filter
                .period_id
                .as_deref()
                .and_then(|id| Uuid::parse_str(id).ok()),
            tag: filter.tag.clone(),
        };

        let task_rows = tasks::list_filtered(&self.pool, self.user.id, &store_filter).await?;
        let attributes = tasks::attributes_for_user(&self.pool, self.user.id).await?;
        let tag_names = tasks::tag_names_for_user(&self.pool, self.user.id).await?;
        let period_index: HashMap<Uuid, TimePeriod> = periods::list_all(&self.pool, self.user.id)
            .await?
            .into_iter()
            .map(|period| (period.id, period))
            .collect();

        let mut records = Vec::with_capacity(task_rows.len());
        for task in task_rows {
            let attrs = attributes.get(&task.id);
            let period = period_index.get(&task.period_id);
            records.push(TaskRecord {
                id: task.id.to_string(),
                title: task.title,
                completed: task.completed,
                completed_at: task.completed_at.map(|t| t.to_rfc3339()),
                time_spent_ms: task.time_spent_ms,
                expected_hours: parse_numeric_attr(attrs, "expected_hours"),
                progress: parse_numeric_attr(attrs, "progress"),
                tags: tag_names.get(&task.id).cloned().unwrap_or_default(),
                period_type: period.map_or_else(String::new, |p| {
                    match p.period_type {
                        PeriodType::Yearly => "yearly",
                        PeriodType::Monthly => "monthly",
                        PeriodType::Weekly => "weekly",
                        PeriodType::Daily => "daily",
                    }
                    .to_string()
                }),
                year: period.map_or(0, |p| p.year),
                month: period.and_then(|p| p.month),
                week: period.and_then(|p| p.week),
                day: period.and_then(|p| p.day),
            });
        }
        Ok(records)
    }

    async fn objectives(&self, filter: &ObjectiveFilter) -> anyhow::Result<Vec<ObjectiveRecord>> {
        let level = match filter.level.as_deref() {
            Some("yearly") => Some(ObjectiveLevel::Yearly),
            Some("monthly") => Some(ObjectiveLevel::Monthly),
            _ => None,
        };
        let objective_rows =
            objectives::list(&self.pool, self.user.id, filter.year, level).await?;

        let mut records = Vec::with_capacity(objective_rows.len());
        for objective in objective_rows {
            let krs = objectives::krs_for_objective(&self.pool, objective.id).await?;
            let score = waypoint_scoring::objective_score(&krs);
            records.push(ObjectiveRecord {
                id: objective.id.to_string(),
                title: objective.title,
                level: match objective.level {
                    ObjectiveLevel::Yearly => "yearly".to_string(),
                    ObjectiveLevel::Monthly => "monthly".to_string(),
                },
                year: objective.year,
                month: objective.month,
                weight: objective.weight,
                score,
                key_results: krs
                    .iter()
                    .map(|kr| waypoint_sandbox::KeyResultRecord {
                        id: kr.id.to_string(),
                        title: kr.title.clone(),
                        weight: kr.weight,
                        score: waypoint_scoring::kr_score(kr),
                        measurement: match kr.measurement {
                            waypoint_store::MeasurementType::Slider => "slider".to_string(),
                            waypoint_store::MeasurementType::Checkboxes => {
                                "checkboxes".to_string()
                            }
                            waypoint_store::MeasurementType::CustomQuery => {
                                "custom_query".to_string()
                            }
                        },
                    })
                    .collect(),
            });
        }
        Ok(records)
    }

    fn today(&self) -> TodayInfo {
        TodayInfo::now(self.user.timezone.as_deref(), self.week_start)
    }
}

/// Widest date range the filter can match, so one range query suffices.
fn range_bounds(filter: &DailyFilter) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| anyhow::anyhow!("bad date {s:?}, expected YYYY-MM-DD"))
    };

    let from = match (&filter.from, filter.year) {
        (Some(s), _) => parse(s)?,
        (None, Some(year)) => NaiveDate::from_ymd_opt(year as i32, 1, 1)
            .ok_or_else(|| anyhow::anyhow!("bad year {year}"))?,
        (None, None) => NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default(),
    };
    let to = match (&filter.to, filter.year) {
        (Some(s), _) => parse(s)?,
        (None, Some(year)) => NaiveDate::from_ymd_opt(year as i32, 12, 31)
            .ok_or_else(|| anyhow::anyhow!("bad year {year}"))?,
        (None, None) => NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or_default(),
    };
    Ok((from, to))
}

fn parse_numeric_attr(attrs: Option<&HashMap<String, String>>, key: &str) -> Option<f64> {
    attrs?.get(key)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_store::{test_pool, users, PeriodScope};

    async fn fixture_user(pool: &SqlitePool) -> User {
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
    }

    #[tokio::test]
    async fn test_daily_shapes_rows_per_day() {
        let pool = test_pool().await;
        let user = fixture_user(&pool).await;
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date");

        metric_values::upsert(&pool, user.id, date, "fitbit.steps", &json!(10234), "fitbit")
            .await
            .expect("upsert steps");
        metric_values::upsert(&pool, user.id, date, "sleep", &json!("07:30"), "user")
            .await
            .expect("upsert sleep");

        let api = StoreDataApi::new(pool, user);
        let records = api
            .daily(&DailyFilter {
                from: Some("2025-03-14".into()),
                to: Some("2025-03-14".into()),
                ..DailyFilter::default()
            })
            .await
            .expect("daily");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2025-03-14");
        assert_eq!(records[0].metrics["fitbit.steps"], json!(10234));
        assert_eq!(records[0].metrics["sleep"], json!("07:30"));
        assert_eq!(records[0].week, i64::from(week_number(date, WeekStart::Monday)));
    }

    #[tokio::test]
    async fn test_tasks_resolve_attributes_and_periods() {
        let pool = test_pool().await;
        let user = fixture_user(&pool).await;
        let period = periods::get_or_create(
            &pool,
            user.id,
            PeriodType::Weekly,
            PeriodScope::weekly(2025, 11),
        )
        .await
        .expect("create period");
        let task = tasks::create(
            &pool,
            tasks::NewTask {
                user_id: user.id,
                period_id: period.id,
                title: "Estimate".into(),
                sort_order: 0,
            },
        )
        .await
        .expect("create task");
        tasks::set_attribute(&pool, task.id, "expected_hours", "2.5")
            .await
            .expect("set attribute");
        tasks::set_attribute(&pool, task.id, "progress", "not-a-number")
            .await
            .expect("set attribute");

        let api = StoreDataApi::new(pool, user);
        let records = api.tasks(&TaskQueryFilter::default()).await.expect("tasks");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expected_hours, Some(2.5));
        // Unparsable numeric attributes come through as absent, not errors.
        assert_eq!(records[0].progress, None);
        assert_eq!(records[0].period_type, "weekly");
        assert_eq!(records[0].week, Some(11));
    }
}
