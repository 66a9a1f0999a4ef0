//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request id set by the request-id layer
//! - `CallerIdentity`: the caller established by the upstream identity service
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     caller: CallerIdentity,
//! ) -> Result<Json<Response>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, caller = %caller.0.id, "Processing request");
//!     Ok(Json(response))
//! }
//! ```

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use fidelidad_runtime::{Caller, Role};
use uuid::Uuid;

/// Request id header, shared with the request-id layer.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller id header.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Caller role header (`member` or `admin`, default `member`).
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

/// Correlation ID for request tracing.
///
/// Read from the `X-Request-ID` header, or a new UUID v4 if the header is
/// missing or not a UUID.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The authenticated caller.
///
/// Identity is established upstream; this service trusts the
/// `X-Caller-Id` and `X-Caller-Role` headers. A missing or blank id is
/// rejected with 401, an unknown role with 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::unauthorized("Missing caller identity"))?;

        let role = match parts
            .headers
            .get(CALLER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|role| role.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("" | "member") => Role::Member,
            Some("admin") => Role::Admin,
            Some(other) => {
                return Err(AppError::bad_request(format!("Unknown caller role: {other}")));
            }
        };

        Ok(Self(Caller {
            id: id.to_string(),
            role,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn caller(builder: axum::http::request::Builder) -> Result<CallerIdentity, AppError> {
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(REQUEST_ID_HEADER, uuid.to_string())
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_generates_new() {
        let req = Request::builder()
            .header(REQUEST_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_ne!(correlation_id.0, Uuid::nil());
    }

    #[tokio::test]
    async fn test_member_caller_by_default() {
        let identity = caller(Request::builder().header(CALLER_ID_HEADER, " VG7 "))
            .await
            .unwrap();
        assert_eq!(identity.0, Caller::member("VG7"));
    }

    #[tokio::test]
    async fn test_admin_role_is_case_insensitive() {
        let identity = caller(
            Request::builder()
                .header(CALLER_ID_HEADER, "staff-1")
                .header(CALLER_ROLE_HEADER, "Admin"),
        )
        .await
        .unwrap();
        assert_eq!(identity.0, Caller::admin("staff-1"));
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let err = caller(Request::builder()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let blank = caller(Request::builder().header(CALLER_ID_HEADER, "  "))
            .await
            .unwrap_err();
        assert_eq!(blank.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_role_is_rejected() {
        let err = caller(
            Request::builder()
                .header(CALLER_ID_HEADER, "VG1")
                .header(CALLER_ROLE_HEADER, "root"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
