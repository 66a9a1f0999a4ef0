//! Error types for web handlers.
//!
//! [`AppError`] bridges loyalty errors and HTTP responses. Every error body
//! carries a stable machine-readable `code` next to a display message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fidelidad_core::error::StoreError;
use fidelidad_runtime::LoyaltyError;
use serde::Serialize;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(caller: CallerIdentity) -> Result<Json<MemberSummary>, AppError> {
///     let summary = service.member_summary(&caller.member_id()).await?
///         .ok_or_else(|| AppError::not_found("MEMBER_NOT_FOUND", "Member not found"))?;
///     Ok(Json(summary))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<BoxError>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 404 Not Found error with a specific code.
    #[must_use]
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<LoyaltyError> for AppError {
    fn from(err: LoyaltyError) -> Self {
        let status = match &err {
            LoyaltyError::InvalidArgument(_) | LoyaltyError::InvalidTier(_) => {
                StatusCode::BAD_REQUEST
            }
            LoyaltyError::Forbidden(_) => StatusCode::FORBIDDEN,
            LoyaltyError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = match &err {
            // Store details stay in the logs.
            LoyaltyError::Store(_) => "The operation could not be completed, please retry".to_string(),
            other => other.to_string(),
        };
        Self::new(status, err.code(), message).with_source(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        LoyaltyError::from(err).into()
    }
}
