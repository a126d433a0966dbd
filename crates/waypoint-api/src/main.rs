//! Waypoint API server entry point.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod auth;
mod routes;

/// Wait for SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C (SIGINT), initiating graceful shutdown...");
                Ok(())
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!("Received Ctrl+C (SIGINT), initiating graceful shutdown...");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,waypoint_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Waypoint API server");

    let settings = waypoint_config::Settings::from_env()?;
    let addr = settings.server_addr();

    info!("Database: {}", settings.database_path);
    let pool = waypoint_store::connect(&settings.database_url()).await?;

    let (router, state) = app::create_app(&settings, pool)?;

    // Sync scheduler runs until the shutdown flag flips.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = Arc::clone(&state.scheduler).start(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = shutdown_signal().await {
                error!(error = %e, "Error waiting for shutdown signal");
            }
        })
        .await;

    // Stop taking new sync work, then give in-flight steps a bounded drain.
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(
        std::time::Duration::from_secs(settings.server.shutdown_timeout_secs),
        scheduler_handle,
    )
    .await
    {
        Ok(_) => info!("Sync scheduler drained"),
        Err(_) => error!("Sync scheduler did not drain in time; aborting it"),
    }

    match serve_result {
        Ok(()) => {
            info!("Server shut down successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Error during server shutdown");
            Err(anyhow::anyhow!("Server shutdown error: {e}"))
        }
    }
}
