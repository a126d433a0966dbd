//! Application setup.
//!
//! Builds the shared state and the axum router with all routes and
//! middleware.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use waypoint_config::{ConfigResolver, Encryptor, Settings};
use waypoint_events::ChangeBroadcaster;
use waypoint_plugins::{OAuthBroker, PluginRegistry};
use waypoint_query::QueryExecutor;
use waypoint_sync::{SyncScheduler, SyncSchedulerConfig};

use crate::routes;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Two-tier config resolver
    pub config: Arc<ConfigResolver>,
    /// Credential encryption
    pub encryptor: Encryptor,
    /// Registered plugins
    pub registry: Arc<PluginRegistry>,
    /// OAuth flow broker
    pub broker: Arc<OAuthBroker>,
    /// Per-user change fan-out
    pub broadcaster: Arc<ChangeBroadcaster>,
    /// Sandbox orchestration
    pub executor: Arc<QueryExecutor>,
    /// Sync scheduler (shared with the background task)
    pub scheduler: Arc<SyncScheduler>,
}

/// Build the state and router; the caller starts the scheduler.
///
/// # Errors
/// Returns an error if the encryption key is invalid.
pub fn create_app(settings: &Settings, pool: SqlitePool) -> Result<(Router, AppState)> {
    use secrecy::ExposeSecret;

    let encryptor = Encryptor::from_hex_key(settings.encryption_key.expose_secret())?;
    let config = Arc::new(ConfigResolver::new(pool.clone()));
    let broker = Arc::new(OAuthBroker::new());
    let registry = Arc::new(PluginRegistry::new(Arc::clone(&config), Arc::clone(&broker)));
    let broadcaster = Arc::new(ChangeBroadcaster::new());
    let executor = Arc::new(QueryExecutor::new(pool.clone(), Arc::clone(&broadcaster)));
    let scheduler = Arc::new(SyncScheduler::new(
        pool.clone(),
        Arc::clone(&registry),
        encryptor.clone(),
        Arc::clone(&broadcaster),
        Arc::clone(&broker),
        SyncSchedulerConfig::default(),
    ));

    let state = AppState {
        pool,
        config,
        encryptor,
        registry,
        broker,
        broadcaster,
        executor,
        scheduler,
    };

    info!(
        plugins = state.registry.all().len(),
        "Application state ready"
    );

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::tasks::router())
        .merge(routes::tags::router())
        .merge(routes::objectives::router())
        .merge(routes::queries::router())
        .merge(routes::widgets::router())
        .merge(routes::metrics::router())
        .merge(routes::plugins::router())
        .merge(routes::events::router())
        .merge(routes::admin::router())
        .with_state(state.clone())
        .layer(
            tower::ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        );

    Ok((app, state))
}
