//! Application state for Axum handlers.

use fidelidad_core::store::DocumentStore;
use fidelidad_runtime::LoyaltyService;
use fidelidad_runtime::metrics::MetricsExporter;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// let service = LoyaltyService::new(Arc::new(store));
/// let app = fidelidad_web::router(AppState::new(service, exporter));
/// ```
pub struct AppState<S: DocumentStore> {
    /// Loyalty operations.
    pub service: Arc<LoyaltyService<S>>,
    /// Prometheus recorder rendered on `/metrics`.
    pub metrics: MetricsExporter,
}

// Manual impl: `S` itself need not be `Clone`.
impl<S: DocumentStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: DocumentStore> AppState<S> {
    /// Create the application state.
    #[must_use]
    pub fn new(service: LoyaltyService<S>, metrics: MetricsExporter) -> Self {
        Self {
            service: Arc::new(service),
            metrics,
        }
    }
}
