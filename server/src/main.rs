//! Club Van Gogh loyalty server.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store
//! cargo run -p fidelidad-server
//!
//! # PostgreSQL store
//! FIDELIDAD_STORE=postgres DATABASE_URL=postgres://localhost/fidelidad cargo run -p fidelidad-server
//! ```

use anyhow::Context;
use fidelidad_runtime::metrics::MetricsExporter;
use fidelidad_server::{Config, build_router, init_tracing, report_dotenv, serve};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional; reported once tracing is up.
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(&config);
    report_dotenv(&dotenv);

    tracing::info!(
        bind = %config.server.bind,
        backend = ?config.store.backend,
        stale_policy = ?config.stale_policy,
        webhook = config.webhook.is_some(),
        "Configuration loaded"
    );

    let mut metrics = MetricsExporter::new();
    metrics.install().context("Failed to install metrics recorder")?;

    let app = build_router(&config, metrics)
        .await
        .context("Failed to initialize application")?;

    let shutdown_timeout = config.server.shutdown_timeout;
    serve(&config, app, shutdown_signal(shutdown_timeout)).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C, then arm a watchdog that exits if draining takes
/// longer than `timeout`.
async fn shutdown_signal(timeout: Duration) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!(timeout_secs = timeout.as_secs(), "Shutting down gracefully...");

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::warn!("Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
