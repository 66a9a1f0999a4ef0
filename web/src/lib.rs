//! Axum HTTP surface for the Club Van Gogh loyalty platform.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives; the request-id layer assigns `X-Request-ID`
//! 2. **Extract** the caller identity and JSON body
//! 3. **Call** the [`LoyaltyService`](fidelidad_runtime::LoyaltyService)
//! 4. **Map** the outcome to a status code and JSON body
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/health` | liveness |
//! | GET | `/ready` | store ping |
//! | GET | `/metrics` | Prometheus text |
//! | POST | `/api/redeem` | redeem points for a coupon |
//! | POST | `/api/commands` | any [`LoyaltyCommand`](fidelidad_runtime::LoyaltyCommand) |
//! | GET | `/api/members/me` | caller summary |
//! | GET | `/api/members/me/movements` | caller ledger |
//! | GET | `/api/pricing` | tier costs |
//! | GET | `/api/coupons/stock` | available coupons per tier |
//!
//! # Example
//!
//! ```ignore
//! let service = LoyaltyService::new(Arc::new(store));
//! let app = fidelidad_web::router(AppState::new(service, exporter));
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use fidelidad_core::store::DocumentStore;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use error::AppError;
pub use extractors::{CallerIdentity, CorrelationId};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router<S: DocumentStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness::<S>))
        .route("/metrics", get(handlers::metrics::<S>))
        .route("/api/redeem", post(handlers::loyalty::redeem::<S>))
        .route("/api/commands", post(handlers::loyalty::command::<S>))
        .route("/api/members/me", get(handlers::loyalty::me::<S>))
        .route(
            "/api/members/me/movements",
            get(handlers::loyalty::movements::<S>),
        )
        .route("/api/pricing", get(handlers::loyalty::pricing::<S>))
        .route("/api/coupons/stock", get(handlers::loyalty::coupon_stock::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
