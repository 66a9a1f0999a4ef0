//! Club Van Gogh loyalty server.
//!
//! Wires configuration, telemetry, the document store, notifications and the
//! HTTP router together. The `fidelidad` binary is a thin wrapper around
//! [`build_router`] and [`serve`].

#![forbid(unsafe_code)]

pub mod config;

pub use config::{Backend, Config, ConfigError, LogFormat};

use axum::Router;
use fidelidad_core::error::StoreError;
use fidelidad_core::store::DocumentStore;
use fidelidad_postgres::{PoolSettings, PostgresDocumentStore};
use fidelidad_runtime::LoyaltyService;
use fidelidad_runtime::metrics::MetricsExporter;
use fidelidad_runtime::notify::{ConsoleNotifier, Notifier, NotifyError, WebhookNotifier};
use fidelidad_testing::InMemoryDocumentStore;
use fidelidad_web::{AppState, router};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt};

/// Startup failures.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The store could not be reached or migrated.
    #[error("Store initialization failed: {0}")]
    Store(#[from] StoreError),

    /// The notifier could not be built.
    #[error("Notifier initialization failed: {0}")]
    Notifier(#[from] NotifyError),

    /// The listener could not be bound or the server failed.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. Returns `false` if a
/// subscriber was already installed.
pub fn init_tracing(config: &Config) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_filter));

    let builder = fmt().with_env_filter(filter).with_target(true);
    match config.server.log_format {
        LogFormat::Pretty => builder.pretty().try_init().is_ok(),
        LogFormat::Json => builder.json().flatten_event(true).try_init().is_ok(),
    }
}

/// Outcome of loading the optional `.env` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DotenvStatus {
    /// Variables were loaded from the file.
    Loaded,
    /// No file; the process environment is used as is.
    Absent,
    /// The file exists but could not be read or parsed.
    Malformed,
}

/// Log the result of `dotenvy::dotenv()`. Call after [`init_tracing`].
pub fn report_dotenv(result: &Result<PathBuf, dotenvy::Error>) -> DotenvStatus {
    match result {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "Loaded .env file");
            DotenvStatus::Loaded
        }
        Err(e) if e.not_found() => {
            tracing::debug!("No .env file, using the process environment");
            DotenvStatus::Absent
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable .env file");
            DotenvStatus::Malformed
        }
    }
}

fn notifier(config: &Config) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.webhook {
        Some(webhook) => {
            let policy = fidelidad_runtime::RetryPolicy {
                max_retries: webhook.max_retries,
                ..fidelidad_runtime::RetryPolicy::default()
            };
            let notifier = WebhookNotifier::new(webhook.url.clone(), webhook.timeout, policy)?;
            tracing::info!(url = notifier.url(), "Webhook notifications enabled");
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(ConsoleNotifier::new())),
    }
}

fn app<S: DocumentStore>(
    store: S,
    config: &Config,
    metrics: MetricsExporter,
) -> Result<Router, BootstrapError> {
    let service = LoyaltyService::new(Arc::new(store))
        .with_notifier(notifier(config)?)
        .with_stale_policy(config.stale_policy);
    Ok(router(AppState::new(service, metrics)))
}

/// Build the router for the configured backend.
///
/// The postgres backend connects and runs migrations first.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the store or the notifier cannot be
/// initialized.
pub async fn build_router(config: &Config, metrics: MetricsExporter) -> Result<Router, BootstrapError> {
    match config.store.backend {
        Backend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on shutdown");
            app(
                InMemoryDocumentStore::with_policy(config.retry.clone()),
                config,
                metrics,
            )
        }
        Backend::Postgres => {
            let url = config.store.database_url.as_deref().ok_or_else(|| {
                StoreError::Unavailable("DATABASE_URL is not set".to_string())
            })?;
            let settings = PoolSettings {
                max_connections: config.store.max_connections,
                acquire_timeout: config.store.acquire_timeout,
            };
            let store = PostgresDocumentStore::connect(url, &settings)
                .await?
                .with_policy(config.retry.clone());
            store.migrate().await?;
            tracing::info!(max_connections = settings.max_connections, "PostgreSQL store ready");
            app(store, config, metrics)
        }
    }
}

/// Serve `app` on the configured address until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`BootstrapError::Io`] if the address cannot be bound.
pub async fn serve<F>(config: &Config, app: Router, shutdown: F) -> Result<(), BootstrapError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
