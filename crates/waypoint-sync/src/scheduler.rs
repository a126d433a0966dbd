//! The sync scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use waypoint_config::Encryptor;
use waypoint_core::{ApiError, ExternalErrorKind, PluginCredentials, UserId};
use waypoint_events::{ChangeBroadcaster, ChangeTag};
use waypoint_plugins::{
    sanitize_records, OAuthBroker, OAuthError, PluginError, PluginRegistry, SourcePlugin,
};
use waypoint_store::{metric_values, plugins as plugin_store, users};

/// Refresh tokens when they expire within this many seconds.
const REFRESH_SKEW_SECONDS: i64 = 60;

/// Scheduler timing configuration.
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Tick period for the periodic sweep (1 hour in production)
    pub tick_interval: Duration,
    /// Budget for one (user, plugin) sync step
    pub step_timeout: Duration,
    /// Days of history pulled by the periodic sweep
    pub backfill_days: i64,
    /// Whether to run a sweep immediately on start
    pub run_initial_sync: bool,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60 * 60),
            step_timeout: Duration::from_secs(5 * 60),
            backfill_days: 7,
            run_initial_sync: false,
        }
    }
}

/// Result of one sync step.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Days with at least one imported field
    pub records_imported: usize,
    /// Individual field values upserted
    pub values_written: usize,
}

/// Failures of one sync step.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The user has no enabled connection with credentials for this plugin
    #[error("plugin is not connected")]
    NotConnected,
    /// Unknown plugin id
    #[error("unknown plugin")]
    UnknownPlugin,
    /// Transient provider trouble; retried on a later tick
    #[error("retriable: {0}")]
    Retriable(String),
    /// Authorization is gone for good; the connection gets disabled
    #[error("authorization revoked: {0}")]
    AuthPermanent(String),
    /// Store failure
    #[error(transparent)]
    Store(#[from] waypoint_store::StoreError),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConnected => Self::Validation("plugin is not connected".into()),
            SyncError::UnknownPlugin => Self::NotFound("plugin".into()),
            SyncError::Retriable(message) => {
                Self::external(ExternalErrorKind::ProviderUnavailable, message)
            }
            SyncError::AuthPermanent(message) => {
                Self::external(ExternalErrorKind::RefreshFailed, message)
            }
            SyncError::Store(store) => store.into(),
        }
    }
}

/// Periodic and on-demand plugin synchronization.
pub struct SyncScheduler {
    pool: SqlitePool,
    registry: Arc<PluginRegistry>,
    encryptor: Encryptor,
    broadcaster: Arc<ChangeBroadcaster>,
    broker: Arc<OAuthBroker>,
    config: SyncSchedulerConfig,
    /// One lock per (user, plugin); serializes syncs for the pair.
    locks: Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl SyncScheduler {
    /// Build a scheduler.
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        registry: Arc<PluginRegistry>,
        encryptor: Encryptor,
        broadcaster: Arc<ChangeBroadcaster>,
        broker: Arc<OAuthBroker>,
        config: SyncSchedulerConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            encryptor,
            broadcaster,
            broker,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the periodic loop. It refuses new work once `shutdown` flips
    /// to `true` and exits at the next safe point.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tick_secs = self.config.tick_interval.as_secs(),
                "Sync scheduler started"
            );

            if self.config.run_initial_sync {
                self.run_cycle(&shutdown).await;
            }

            let mut ticker = interval(self.config.tick_interval);
            ticker.tick().await; // immediate first tick is consumed

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.broker.sweep_pending();
                        self.run_cycle(&shutdown).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Sync scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One sweep over every syncable (user, plugin) connection.
    ///
    /// Failures are contained per tuple: logged, skipped, next tuple runs.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) {
        let connections = match plugin_store::list_syncable(&self.pool).await {
            Ok(connections) => connections,
            Err(e) => {
                error!(error = %e, "Failed to list syncable connections");
                return;
            }
        };
        debug!(count = connections.len(), "Sync sweep starting");

        for connection in connections {
            if *shutdown.borrow() {
                info!("Sync sweep interrupted by shutdown");
                return;
            }
            let result = self
                .sync_now(connection.user_id, &connection.plugin_id, None)
                .await;
            match result {
                Ok(report) => debug!(
                    user_id = %connection.user_id,
                    plugin = %connection.plugin_id,
                    records = report.records_imported,
                    "Sync step finished"
                ),
                Err(e) => warn!(
                    user_id = %connection.user_id,
                    plugin = %connection.plugin_id,
                    error = %e,
                    "Sync step failed"
                ),
            }
        }
    }

    /// Sync one (user, plugin) now, over `range` or the default backfill
    /// window ending today in the user's timezone.
    ///
    /// # Errors
    /// See [`SyncError`]; `Retriable` leaves `last_sync` untouched,
    /// `AuthPermanent` disables the connection.
    pub async fn sync_now(
        &self,
        user_id: Uuid,
        plugin_id: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<SyncReport, SyncError> {
        let plugin = self
            .registry
            .get(plugin_id)
            .ok_or(SyncError::UnknownPlugin)?;

        let lock = self.lock_for(user_id, plugin_id).await;
        let _guard = lock.lock().await;

        let step = self.sync_step(user_id, plugin.as_ref(), range);
        match tokio::time::timeout(self.config.step_timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Retriable("sync step exceeded its budget".into())),
        }
    }

    async fn sync_step(
        &self,
        user_id: Uuid,
        plugin: &dyn SourcePlugin,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<SyncReport, SyncError> {
        let plugin_id = plugin.id();

        let connection = plugin_store::get(&self.pool, user_id, plugin_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or(SyncError::NotConnected)?;
        let Some(ref sealed) = connection.credentials else {
            return Err(SyncError::NotConnected);
        };

        let mut creds: PluginCredentials = self
            .encryptor
            .decrypt_json(sealed)
            .map_err(|e| SyncError::AuthPermanent(format!("stored credentials unreadable: {e}")))?;

        // Refresh ahead of expiry; permanent refresh failure disables the
        // connection so the sweep stops retrying a dead grant.
        if creds.expires_within(REFRESH_SKEW_SECONDS) {
            creds = self.refresh_and_persist(user_id, plugin, &creds).await?;
        }

        let (start, end) = match range {
            Some(range) => range,
            None => {
                let user = users::get_active(&self.pool, user_id).await?;
                let today = waypoint_core::week::local_date(user.timezone.as_deref());
                (
                    today - chrono::Duration::days(self.config.backfill_days),
                    today,
                )
            }
        };

        let field_ids: Vec<String> = plugin
            .available_fields()
            .into_iter()
            .map(|field| field.id)
            .collect();

        let records = match plugin.fetch_data(&creds, start, end, &field_ids).await {
            Ok(records) => records,
            // A revoked token sometimes only shows up at fetch time; try one
            // refresh-and-retry before giving up.
            Err(PluginError::AuthRevoked) => {
                let creds = self.refresh_and_persist(user_id, plugin, &creds).await?;
                match plugin.fetch_data(&creds, start, end, &field_ids).await {
                    Ok(records) => records,
                    Err(PluginError::AuthRevoked) => {
                        self.disable_connection(user_id, plugin_id).await;
                        return Err(SyncError::AuthPermanent(
                            "token rejected after refresh".into(),
                        ));
                    }
                    Err(PluginError::ProviderUnavailable(message)) => {
                        return Err(SyncError::Retriable(message))
                    }
                    Err(PluginError::Other(message)) => return Err(SyncError::Retriable(message)),
                }
            }
            Err(PluginError::ProviderUnavailable(message)) => {
                return Err(SyncError::Retriable(message))
            }
            Err(PluginError::Other(message)) => return Err(SyncError::Retriable(message)),
        };

        let clean = sanitize_records(plugin, records);
        let mut values_written = 0usize;
        for record in &clean {
            for (field_id, value) in &record.fields {
                let metric_name = format!("{plugin_id}.{field_id}");
                metric_values::upsert(
                    &self.pool,
                    user_id,
                    record.date,
                    &metric_name,
                    value,
                    plugin_id,
                )
                .await?;
                values_written += 1;
            }
        }

        plugin_store::set_last_sync(&self.pool, user_id, plugin_id, Utc::now()).await?;

        if values_written > 0 {
            self.broadcaster.publish_all(
                UserId::from_uuid(user_id),
                &[ChangeTag::Metrics, ChangeTag::Daily],
            );
        }

        info!(
            user_id = %user_id,
            plugin = plugin_id,
            records = clean.len(),
            values = values_written,
            "Sync imported values"
        );

        Ok(SyncReport {
            records_imported: clean.len(),
            values_written,
        })
    }

    async fn refresh_and_persist(
        &self,
        user_id: Uuid,
        plugin: &dyn SourcePlugin,
        creds: &PluginCredentials,
    ) -> Result<PluginCredentials, SyncError> {
        match plugin.refresh_tokens(creds).await {
            Ok(fresh) => {
                let sealed = self
                    .encryptor
                    .encrypt_json(&fresh)
                    .map_err(|e| SyncError::Retriable(format!("credential encryption failed: {e}")))?;
                plugin_store::store_credentials(&self.pool, user_id, plugin.id(), &sealed).await?;
                Ok(fresh)
            }
            Err(OAuthError::ProviderUnavailable(message)) => Err(SyncError::Retriable(message)),
            Err(e) => {
                self.disable_connection(user_id, plugin.id()).await;
                Err(SyncError::AuthPermanent(e.to_string()))
            }
        }
    }

    async fn disable_connection(&self, user_id: Uuid, plugin_id: &str) {
        warn!(user_id = %user_id, plugin = plugin_id, "Disabling plugin connection");
        if let Err(e) = plugin_store::set_enabled(&self.pool, user_id, plugin_id, false).await {
            error!(error = %e, "Failed to disable plugin connection");
        }
    }

    async fn lock_for(&self, user_id: Uuid, plugin_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((user_id, plugin_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use waypoint_plugins::{
        AdminConfigField, FetchRecord, FieldDescriptor, FieldType, OAuthProviderConfig,
        SetupInfoEntry,
    };
    use waypoint_store::test_pool;

    /// Scripted plugin: pops one queued fetch result per call.
    struct ScriptedPlugin {
        fetches: StdMutex<Vec<Result<Vec<FetchRecord>, PluginError>>>,
        refresh: StdMutex<Option<Result<PluginCredentials, OAuthError>>>,
    }

    impl ScriptedPlugin {
        fn new() -> Self {
            Self {
                fetches: StdMutex::new(Vec::new()),
                refresh: StdMutex::new(None),
            }
        }

        fn queue_fetch(&self, result: Result<Vec<FetchRecord>, PluginError>) {
            self.fetches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(0, result);
        }

        fn set_refresh(&self, result: Result<PluginCredentials, OAuthError>) {
            *self
                .refresh
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(result);
        }
    }

    #[async_trait]
    impl SourcePlugin for ScriptedPlugin {
        fn id(&self) -> &'static str {
            "fitbit"
        }
        fn name(&self) -> &'static str {
            "Scripted"
        }
        fn description(&self) -> &'static str {
            "test plugin"
        }
        fn admin_config_fields(&self) -> Vec<AdminConfigField> {
            vec![]
        }
        async fn setup_info(&self) -> anyhow::Result<Vec<SetupInfoEntry>> {
            Ok(vec![])
        }
        async fn is_configured(&self) -> bool {
            true
        }
        async fn oauth_config(&self) -> anyhow::Result<OAuthProviderConfig> {
            anyhow::bail!("not used in tests")
        }
        fn available_fields(&self) -> Vec<FieldDescriptor> {
            vec![FieldDescriptor {
                id: "steps".into(),
                name: "Steps".into(),
                description: "Daily steps".into(),
                field_type: FieldType::Number,
                unit: None,
            }]
        }
        async fn validate_credentials(&self, _: &PluginCredentials) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn refresh_tokens(
            &self,
            creds: &PluginCredentials,
        ) -> Result<PluginCredentials, OAuthError> {
            self.refresh
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| Ok(creds.clone()))
        }
        async fn fetch_data(
            &self,
            _: &PluginCredentials,
            _: NaiveDate,
            _: NaiveDate,
            _: &[String],
        ) -> Result<Vec<FetchRecord>, PluginError> {
            self.fetches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn test_encryptor() -> Encryptor {
        Encryptor::from_hex_key(
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .expect("test encryptor")
    }

    struct Fixture {
        scheduler: SyncScheduler,
        plugin: Arc<ScriptedPlugin>,
        broadcaster: Arc<ChangeBroadcaster>,
        pool: SqlitePool,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        let user = users::create(
            &pool,
            users::NewUser {
                username: "ada".into(),
                display_name: "Ada".into(),
                timezone: None,
                week_start: "monday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user");

        let plugin = Arc::new(ScriptedPlugin::new());
        let registry = Arc::new(PluginRegistry::with_plugins(vec![plugin.clone()]));
        let encryptor = test_encryptor();
        let broadcaster = Arc::new(ChangeBroadcaster::new());

        // Connected with valid, unexpired credentials.
        let creds = PluginCredentials::new("access", "refresh", 3600, "Bearer", "activity");
        let sealed = encryptor.encrypt_json(&creds).expect("seal credentials");
        plugin_store::store_credentials(&pool, user.id, "fitbit", &sealed)
            .await
            .expect("store credentials");

        let scheduler = SyncScheduler::new(
            pool.clone(),
            registry,
            encryptor,
            broadcaster.clone(),
            Arc::new(OAuthBroker::new()),
            SyncSchedulerConfig::default(),
        );

        Fixture {
            scheduler,
            plugin,
            broadcaster,
            pool,
            user_id: user.id,
        }
    }

    fn steps_record(date: &str, steps: i64) -> FetchRecord {
        FetchRecord {
            date: date.into(),
            fields: [("steps".to_string(), json!(steps))].into_iter().collect(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[tokio::test]
    async fn test_sync_imports_external_values() {
        let f = fixture().await;
        f.plugin
            .queue_fetch(Ok(vec![steps_record("2025-03-14", 10234)]));

        let report = f
            .scheduler
            .sync_now(f.user_id, "fitbit", Some((d(2025, 3, 14), d(2025, 3, 14))))
            .await
            .expect("sync");
        assert_eq!(report.records_imported, 1);
        assert_eq!(report.values_written, 1);

        let rows = metric_values::for_date(&f.pool, f.user_id, d(2025, 3, 14))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric_name, "fitbit.steps");
        assert_eq!(rows[0].value_json(), json!(10234));
        assert_eq!(rows[0].source, "fitbit");

        let connection = plugin_store::get(&f.pool, f.user_id, "fitbit")
            .await
            .expect("get connection")
            .expect("connection exists");
        assert!(connection.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let f = fixture().await;
        f.plugin
            .queue_fetch(Ok(vec![steps_record("2025-03-14", 10234)]));
        f.plugin
            .queue_fetch(Ok(vec![steps_record("2025-03-14", 10234)]));

        let range = Some((d(2025, 3, 14), d(2025, 3, 14)));
        f.scheduler
            .sync_now(f.user_id, "fitbit", range)
            .await
            .expect("first sync");
        f.scheduler
            .sync_now(f.user_id, "fitbit", range)
            .await
            .expect("second sync");

        let rows = metric_values::for_date(&f.pool, f.user_id, d(2025, 3, 14))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_json(), json!(10234));
    }

    #[tokio::test]
    async fn test_retriable_error_leaves_last_sync_untouched() {
        let f = fixture().await;
        f.plugin
            .queue_fetch(Err(PluginError::ProviderUnavailable("503".into())));

        let err = f
            .scheduler
            .sync_now(f.user_id, "fitbit", Some((d(2025, 3, 14), d(2025, 3, 14))))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SyncError::Retriable(_)));

        let connection = plugin_store::get(&f.pool, f.user_id, "fitbit")
            .await
            .expect("get connection")
            .expect("connection exists");
        assert!(connection.enabled);
        assert!(connection.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_revoked_auth_disables_connection() {
        let f = fixture().await;
        f.plugin.queue_fetch(Err(PluginError::AuthRevoked));
        f.plugin
            .set_refresh(Err(OAuthError::RefreshFailed("grant revoked".into())));

        let err = f
            .scheduler
            .sync_now(f.user_id, "fitbit", Some((d(2025, 3, 14), d(2025, 3, 14))))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SyncError::AuthPermanent(_)));

        let connection = plugin_store::get(&f.pool, f.user_id, "fitbit")
            .await
            .expect("get connection")
            .expect("connection exists");
        assert!(!connection.enabled);
    }

    #[tokio::test]
    async fn test_change_tags_published_after_import() {
        let f = fixture().await;
        let mut subscription = f
            .broadcaster
            .subscribe(UserId::from_uuid(f.user_id));

        f.plugin
            .queue_fetch(Ok(vec![steps_record("2025-03-14", 1)]));
        f.scheduler
            .sync_now(f.user_id, "fitbit", Some((d(2025, 3, 14), d(2025, 3, 14))))
            .await
            .expect("sync");

        assert_eq!(subscription.recv().await, Some(ChangeTag::Metrics));
        assert_eq!(subscription.recv().await, Some(ChangeTag::Daily));
    }

    #[tokio::test]
    async fn test_unknown_plugin_and_unconnected_user() {
        let f = fixture().await;
        assert!(matches!(
            f.scheduler.sync_now(f.user_id, "garmin", None).await,
            Err(SyncError::UnknownPlugin)
        ));

        let other = users::create(
            &f.pool,
            users::NewUser {
                username: "grace".into(),
                display_name: "Grace".into(),
                timezone: None,
                week_start: "monday".into(),
                is_admin: false,
            },
        )
        .await
        .expect("create user");
        assert!(matches!(
            f.scheduler.sync_now(other.id, "fitbit", None).await,
            Err(SyncError::NotConnected)
        ));
    }
}
