//! Query executor: the orchestration layer in front of the sandbox.
//!
//! Every evaluation passes the rate limiter first, then resolves its source
//! code, runs with a capability bundle bound to the requesting user, and
//! leaves an audit row. Rate-limited attempts never reach the sandbox and
//! write no audit row.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use waypoint_core::{ApiError, SandboxErrorKind};
use waypoint_events::{ChangeBroadcaster, ChangeTag};
use waypoint_sandbox::{Outcome, Sandbox};
use waypoint_store::{
    execution_log, objectives, queries, users, MeasurementType, StoreError, MAX_CODE_BYTES,
};

use crate::data_api::StoreDataApi;
use crate::rate_limit::RateLimiter;

/// Threshold below which a freshly computed KR score is not re-persisted.
const SCORE_WRITE_THRESHOLD: f64 = 1e-3;

/// Where the code for an execution comes from.
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// Inline code from the request body
    Inline(String),
    /// A saved query owned by the same user
    Saved(Uuid),
}

/// What kind of evaluation this is; recorded for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    General,
    Widget,
    KrProgress,
}

/// Result of one KR progress evaluation.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KrProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Orchestrates sandbox runs for one process.
pub struct QueryExecutor {
    pool: SqlitePool,
    sandbox: Sandbox,
    limiter: RateLimiter,
    broadcaster: Arc<ChangeBroadcaster>,
}

impl QueryExecutor {
    /// Build an executor with production limits.
    #[must_use]
    pub fn new(pool: SqlitePool, broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self {
            pool,
            sandbox: Sandbox::new(),
            limiter: RateLimiter::default(),
            broadcaster,
        }
    }

    /// Build an executor with custom sandbox/limiter settings (tests).
    #[must_use]
    pub fn with_parts(
        pool: SqlitePool,
        broadcaster: Arc<ChangeBroadcaster>,
        sandbox: Sandbox,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            pool,
            sandbox,
            limiter,
            broadcaster,
        }
    }

    /// Execute one script on behalf of a user.
    ///
    /// # Errors
    /// `Unauthorized` for missing/disabled users, `RateLimited` over the
    /// window, `NotFound`/`Validation` for bad sources. Sandbox failures are
    /// NOT errors: they come back inside the [`Outcome`].
    #[instrument(skip(self, source, params), fields(user_id = %user_id, context = ?context))]
    pub async fn execute(
        &self,
        user_id: Uuid,
        source: QuerySource,
        params: serde_json::Value,
        context: ExecutionContext,
    ) -> Result<Outcome, ApiError> {
        let user = users::get_active(&self.pool, user_id)
            .await
            .map_err(|_| ApiError::Unauthorized("unknown or disabled user".into()))?;

        if !self.limiter.try_acquire(user_id) {
            debug!("Execution rejected by rate limiter");
            return Err(ApiError::RateLimited);
        }

        let code = self.resolve_code(user_id, &source).await?;

        let data = StoreDataApi::new(self.pool.clone(), user);
        let outcome = self.sandbox.run(&code, &data, params).await;

        self.record_audit(user_id, &code, &outcome).await;

        Ok(outcome)
    }

    /// Evaluate the live score of custom-query key results, serially.
    ///
    /// Each KR counts as one execution against the rate limit. Stored
    /// scores are lazily refreshed when the computed score moves more than
    /// the write threshold.
    ///
    /// # Errors
    /// `Unauthorized` for missing/disabled users. Per-KR problems land in
    /// the returned map, not in the error channel.
    #[instrument(skip(self, kr_ids), fields(user_id = %user_id, count = kr_ids.len()))]
    pub async fn evaluate_krs(
        &self,
        user_id: Uuid,
        kr_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, KrProgress>, ApiError> {
        let user = users::get_active(&self.pool, user_id)
            .await
            .map_err(|_| ApiError::Unauthorized("unknown or disabled user".into()))?;

        let mut results = HashMap::with_capacity(kr_ids.len());
        let mut any_score_changed = false;

        // Serial on purpose: concurrency would make the per-run resource
        // caps meaningless.
        for &kr_id in kr_ids {
            let result = self
                .evaluate_single_kr(&user, kr_id, &mut any_score_changed)
                .await;
            results.insert(kr_id, result);
        }

        if any_score_changed {
            self.broadcaster.publish(
                waypoint_core::UserId::from_uuid(user_id),
                ChangeTag::Objectives,
            );
        }

        Ok(results)
    }

    async fn evaluate_single_kr(
        &self,
        user: &waypoint_store::User,
        kr_id: Uuid,
        any_score_changed: &mut bool,
    ) -> KrProgress {
        let kr = match objectives::get_kr_owned(&self.pool, user.id, kr_id).await {
            Ok(kr) => kr,
            Err(StoreError::NotFound(_)) => return KrProgress::error("key result not found"),
            Err(e) => {
                warn!(error = %e, "KR lookup failed");
                return KrProgress::error("key result lookup failed");
            }
        };

        if kr.measurement != MeasurementType::CustomQuery {
            return KrProgress::error("key result is not measured by a query");
        }

        // Inline code wins; the saved-query reference applies only when no
        // inline code is present.
        let code = match (&kr.progress_query_code, kr.progress_query_id) {
            (Some(code), _) if !code.trim().is_empty() => code.clone(),
            (_, Some(query_id)) => match queries::get_owned(&self.pool, user.id, query_id).await {
                Ok(saved) => saved.code,
                Err(_) => return KrProgress::error("referenced progress query not found"),
            },
            _ => return KrProgress::error("key result has no progress query"),
        };

        if !self.limiter.try_acquire(user.id) {
            return KrProgress::error("rate limit exceeded");
        }

        let data = StoreDataApi::new(self.pool.clone(), user.clone());
        let outcome = self
            .sandbox
            .run(&code, &data, serde_json::Value::Object(serde_json::Map::new()))
            .await;

        self.record_audit(user.id, &code, &outcome).await;

        if let Some(ref error) = outcome.error {
            return KrProgress::error(error.clone());
        }

        let Some(progress) = outcome.progress else {
            return KrProgress::error(format!(
                "{}: script never called progress.set",
                SandboxErrorKind::MissingProgress.code()
            ));
        };

        // Lazy write-back of the cached score.
        if (progress.score - kr.score).abs() > SCORE_WRITE_THRESHOLD {
            match objectives::set_kr_score(&self.pool, kr.id, progress.score).await {
                Ok(()) => {
                    *any_score_changed = true;
                    info!(kr_id = %kr.id, score = progress.score, "Updated cached KR score");
                }
                Err(e) => warn!(error = %e, "Failed to persist KR score"),
            }
        }

        KrProgress {
            score: Some(progress.score),
            label: Some(progress.label),
            error: None,
        }
    }

    async fn resolve_code(&self, user_id: Uuid, source: &QuerySource) -> Result<String, ApiError> {
        let code = match source {
            QuerySource::Inline(code) => code.clone(),
            QuerySource::Saved(query_id) => {
                queries::get_owned(&self.pool, user_id, *query_id)
                    .await
                    .map_err(ApiError::from)?
                    .code
            }
        };
        if code.len() > MAX_CODE_BYTES {
            return Err(ApiError::Validation(format!(
                "query code exceeds {MAX_CODE_BYTES} bytes"
            )));
        }
        Ok(code)
    }

    async fn record_audit(&self, user_id: Uuid, code: &str, outcome: &Outcome) {
        let result = execution_log::record(
            &self.pool,
            execution_log::NewExecutionLog {
                user_id,
                code: code.to_string(),
                success: outcome.error.is_none(),
                error_message: outcome.error.clone(),
                execution_time_ms: outcome.elapsed_ms as i64,
            },
        )
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to write execution log");
        }
    }
}

impl KrProgress {
    fn error(message: impl Into<String>) -> Self {
        Self {
            score: None,
            label: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use waypoint_sandbox::Limits;
    use waypoint_store::{test_pool, NewKeyResult, NewObjective, ObjectiveLevel, QueryType};

    async fn fixture(pool: &SqlitePool) -> waypoint_store::User {
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

    fn executor(pool: SqlitePool) -> QueryExecutor {
        QueryExecutor::new(pool, Arc::new(ChangeBroadcaster::new()))
    }

    #[tokio::test]
    async fn test_execute_inline_writes_audit_row() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let executor = executor(pool.clone());

        let before = Utc::now() - chrono::Duration::seconds(1);
        let outcome = executor
            .execute(
                user.id,
                QuerySource::Inline("progress.set(3, 4)".into()),
                serde_json::json!({}),
                ExecutionContext::General,
            )
            .await
            .expect("execute");

        assert_eq!(outcome.error, None);
        assert!((outcome.progress.expect("progress").score - 0.75).abs() < f64::EPSILON);

        let logs = execution_log::list_recent(&pool, user.id, 10, 0)
            .await
            .expect("list logs");
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        assert!(logs[0].code_snippet.contains("progress.set"));
        assert!(
            execution_log::count_since(&pool, user.id, before)
                .await
                .expect("count")
                >= 1
        );
    }

    #[tokio::test]
    async fn test_failed_run_is_logged_as_failure() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let executor = executor(pool.clone());

        let outcome = executor
            .execute(
                user.id,
                QuerySource::Inline("1 / 0".into()),
                serde_json::json!({}),
                ExecutionContext::General,
            )
            .await
            .expect("execute returns outcome");
        assert!(outcome.error.is_some());

        let logs = execution_log::list_recent(&pool, user.id, 10, 0)
            .await
            .expect("list logs");
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert!(logs[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_rate_limited_execution_writes_no_log_row() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let executor = QueryExecutor::with_parts(
            pool.clone(),
            Arc::new(ChangeBroadcaster::new()),
            Sandbox::new(),
            RateLimiter::new(1, Duration::from_secs(60)),
        );

        executor
            .execute(
                user.id,
                QuerySource::Inline("1 + 1".into()),
                serde_json::json!({}),
                ExecutionContext::General,
            )
            .await
            .expect("first execute");

        let err = executor
            .execute(
                user.id,
                QuerySource::Inline("2 + 2".into()),
                serde_json::json!({}),
                ExecutionContext::General,
            )
            .await
            .expect_err("should be rate limited");
        assert!(matches!(err, ApiError::RateLimited));

        // Only the first run reached the audit log.
        let logs = execution_log::list_recent(&pool, user.id, 10, 0)
            .await
            .expect("list logs");
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_user_is_rejected() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        users::set_disabled(&pool, user.id, true)
            .await
            .expect("disable");
        let executor = executor(pool);

        let err = executor
            .execute(
                user.id,
                QuerySource::Inline("1".into()),
                serde_json::json!({}),
                ExecutionContext::General,
            )
            .await
            .expect_err("should reject");
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    async fn custom_query_kr(
        pool: &SqlitePool,
        user_id: Uuid,
        code: Option<&str>,
        query_id: Option<Uuid>,
    ) -> waypoint_store::KeyResult {
        let objective = objectives::create(
            pool,
            NewObjective {
                user_id,
                level: ObjectiveLevel::Yearly,
                year: 2025,
                month: None,
                title: "Ship it".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create objective");
        objectives::create_kr(
            pool,
            NewKeyResult {
                objective_id: objective.id,
                title: "Progress KR".into(),
                weight: 1.0,
                measurement: MeasurementType::CustomQuery,
                checkbox_items: None,
                progress_query_id: query_id,
                progress_query_code: code.map(String::from),
            },
        )
        .await
        .expect("create kr")
    }

    #[tokio::test]
    async fn test_kr_batch_scores_and_caches() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let kr = custom_query_kr(&pool, user.id, Some("progress.set(3, 4)"), None).await;
        let executor = executor(pool.clone());

        let results = executor
            .evaluate_krs(user.id, &[kr.id])
            .await
            .expect("evaluate");
        let progress = results.get(&kr.id).expect("result present");
        assert_eq!(progress.score, Some(0.75));
        assert_eq!(progress.label.as_deref(), Some("3 / 4"));

        // The cached score was lazily refreshed.
        let stored = objectives::get_kr(&pool, kr.id).await.expect("get kr");
        assert!((stored.score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_kr_missing_progress_keeps_cached_score() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let kr = custom_query_kr(&pool, user.id, Some("1 + 1"), None).await;
        objectives::set_kr_score(&pool, kr.id, 0.6)
            .await
            .expect("seed cached score");
        let executor = executor(pool.clone());

        let results = executor
            .evaluate_krs(user.id, &[kr.id])
            .await
            .expect("evaluate");
        let progress = results.get(&kr.id).expect("result present");
        assert!(progress.score.is_none());
        assert!(progress
            .error
            .as_deref()
            .expect("error present")
            .contains("SANDBOX_MISSING_PROGRESS"));

        // Cached prior score is untouched.
        let stored = objectives::get_kr(&pool, kr.id).await.expect("get kr");
        assert!((stored.score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_kr_saved_query_used_when_inline_absent() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let saved = queries::create(
            &pool,
            user.id,
            "kr progress",
            "progress.set(1, 2)",
            QueryType::KrProgress,
        )
        .await
        .expect("create saved query");
        let kr = custom_query_kr(&pool, user.id, None, Some(saved.id)).await;
        let executor = executor(pool.clone());

        let results = executor
            .evaluate_krs(user.id, &[kr.id])
            .await
            .expect("evaluate");
        assert_eq!(results.get(&kr.id).expect("result").score, Some(0.5));
    }

    #[tokio::test]
    async fn test_kr_on_non_custom_measurement_is_an_error_entry() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let objective = objectives::create(
            &pool,
            NewObjective {
                user_id: user.id,
                level: ObjectiveLevel::Yearly,
                year: 2025,
                month: None,
                title: "Slider".into(),
                weight: 1.0,
                parent_id: None,
            },
        )
        .await
        .expect("create objective");
        let kr = objectives::create_kr(
            &pool,
            NewKeyResult {
                objective_id: objective.id,
                title: "Manual".into(),
                weight: 1.0,
                measurement: MeasurementType::Slider,
                checkbox_items: None,
                progress_query_id: None,
                progress_query_code: None,
            },
        )
        .await
        .expect("create kr");
        let executor = executor(pool);

        let results = executor
            .evaluate_krs(user.id, &[kr.id])
            .await
            .expect("evaluate");
        assert!(results.get(&kr.id).expect("result").error.is_some());
    }

    #[tokio::test]
    async fn test_sandbox_timeout_limits_are_honored() {
        let pool = test_pool().await;
        let user = fixture(&pool).await;
        let executor = QueryExecutor::with_parts(
            pool,
            Arc::new(ChangeBroadcaster::new()),
            Sandbox::with_limits(Limits {
                max_duration: Duration::from_millis(0),
                ..Limits::default()
            }),
            RateLimiter::default(),
        );

        let outcome = executor
            .execute(
                user.id,
                QuerySource::Inline("for (let i of [1,2,3]) { len([i]) }".into()),
                serde_json::json!({}),
                ExecutionContext::Widget,
            )
            .await
            .expect("execute");
        assert!(outcome.error.is_some());
    }
}
