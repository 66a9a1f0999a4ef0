//! Health and metrics endpoints.
//!
//! Used by load balancers and the Prometheus scraper.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use fidelidad_core::store::DocumentStore;
use serde::Serialize;

/// Readiness body.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// Store error, when not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness: the process is up. Does not check the store.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: the store answers a ping.
///
/// # Status Codes
///
/// - 200 OK: store reachable
/// - 503 Service Unavailable: store unreachable
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness<S: DocumentStore>(
    State(state): State<AppState<S>>,
) -> (StatusCode, Json<Readiness>) {
    match state.service.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                error: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

/// Prometheus text exposition.
///
/// ```text
/// GET /metrics
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics<S: DocumentStore>(State(state): State<AppState<S>>) -> Response {
    match state.metrics.render() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
