//! Prometheus metrics for observability and monitoring.
//!
//! Metric families:
//! - Redemptions (outcome counts and latency)
//! - Store transactions (attempts, conflicts, exhaustion)
//! - Administrative operations
//! - Notifications
//!
//! # Example
//!
//! ```rust,no_run
//! use fidelidad_runtime::metrics::MetricsExporter;
//!
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Serve `exporter.render()` from the HTTP layer.
//! # Ok::<(), fidelidad_runtime::metrics::MetricsError>(())
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder installation and rendering.
///
/// The recorder is process-global; the HTTP layer renders it on `/metrics`.
#[derive(Clone, Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning
    /// and succeeds without a handle; [`render`](Self::render) then returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Whether this exporter owns the installed recorder.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Redemption Metrics
    describe_counter!(
        "fidelidad_redemptions_total",
        "Redemption requests by outcome status"
    );
    describe_histogram!(
        "fidelidad_redemption_duration_seconds",
        "Time taken to run a redemption, retries included"
    );
    describe_counter!(
        "fidelidad_points_redeemed_total",
        "Points debited by successful redemptions"
    );

    // Transaction Metrics
    describe_counter!(
        "fidelidad_transaction_attempts_total",
        "Transaction body executions"
    );
    describe_counter!(
        "fidelidad_transaction_conflicts_total",
        "Attempts discarded because of a write conflict"
    );
    describe_counter!(
        "fidelidad_transaction_exhausted_total",
        "Transactions abandoned after the retry limit"
    );
    describe_histogram!(
        "fidelidad_transaction_attempts_per_commit",
        "Body executions needed per committed transaction"
    );
    describe_histogram!(
        "fidelidad_transaction_duration_seconds",
        "Time from first attempt to commit"
    );

    // Admin Metrics
    describe_counter!(
        "fidelidad_admin_operations_total",
        "Administrative operations by kind and outcome"
    );

    // Notification Metrics
    describe_counter!(
        "fidelidad_notifications_sent_total",
        "Notices delivered to the notification sink"
    );
    describe_counter!(
        "fidelidad_notifications_failed_total",
        "Notices the sink failed to deliver"
    );
}

/// Redemption metrics recorder.
pub struct RedemptionMetrics;

impl RedemptionMetrics {
    /// Record one finished redemption.
    pub fn record(status: &'static str, duration: Duration) {
        counter!("fidelidad_redemptions_total", "status" => status).increment(1);
        histogram!("fidelidad_redemption_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record points debited by a successful redemption.
    pub fn record_points(points: u64) {
        counter!("fidelidad_points_redeemed_total").increment(points);
    }
}

/// Store transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record one body execution.
    pub fn record_attempt() {
        counter!("fidelidad_transaction_attempts_total").increment(1);
    }

    /// Record a discarded attempt.
    pub fn record_conflict() {
        counter!("fidelidad_transaction_conflicts_total").increment(1);
    }

    /// Record an abandoned transaction.
    pub fn record_exhausted() {
        counter!("fidelidad_transaction_exhausted_total").increment(1);
    }

    /// Record a commit after `attempts` executions.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_commit(attempts: usize, duration: Duration) {
        histogram!("fidelidad_transaction_attempts_per_commit").record(attempts as f64);
        histogram!("fidelidad_transaction_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Administrative operation metrics recorder.
pub struct AdminMetrics;

impl AdminMetrics {
    /// Record an administrative operation.
    pub fn record(operation: &'static str, outcome: &'static str) {
        counter!(
            "fidelidad_admin_operations_total",
            "operation" => operation,
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a delivered notice.
    pub fn record_sent(kind: &'static str) {
        counter!("fidelidad_notifications_sent_total", "kind" => kind).increment(1);
    }

    /// Record a failed delivery.
    pub fn record_failure(kind: &'static str) {
        counter!("fidelidad_notifications_failed_total", "kind" => kind).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(!exporter.is_installed());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_exporter_renders_recorded_metrics() {
        let mut exporter = MetricsExporter::new();
        exporter.install().unwrap();

        RedemptionMetrics::record("redeemed", Duration::from_millis(12));
        RedemptionMetrics::record_points(100);
        TransactionMetrics::record_attempt();
        TransactionMetrics::record_conflict();
        NotificationMetrics::record_sent("coupon_redeemed");

        // Another test may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("fidelidad_redemptions_total"));
            assert!(rendered.contains("fidelidad_transaction_conflicts_total"));
            assert!(rendered.contains("fidelidad_notifications_sent_total"));
        }
    }
}
