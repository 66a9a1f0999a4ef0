//! Loyalty endpoints.
//!
//! Every handler acts for the [`CallerIdentity`] of the request. The
//! redemption endpoint always answers with the [`ClaimResponse`] body; its
//! HTTP status follows the outcome.

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::{CallerIdentity, CorrelationId};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use fidelidad_core::DateTime;
use fidelidad_core::Utc;
use fidelidad_core::model::LedgerEntry;
use fidelidad_core::store::DocumentStore;
use fidelidad_runtime::views::MemberSummary;
use fidelidad_runtime::{ClaimResponse, CommandResult, LoyaltyCommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Movements returned when the query does not say.
pub const DEFAULT_MOVEMENTS_LIMIT: usize = 20;

/// Body of `POST /api/redeem`.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Tier as typed by the member.
    pub tier: String,
}

/// Query of `GET /api/members/me/movements`.
#[derive(Debug, Default, Deserialize)]
pub struct MovementsParams {
    /// Maximum number of movements.
    pub limit: Option<usize>,
}

/// Body of `GET /api/pricing`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingView {
    /// Cost of every tier, keyed by canonical tier.
    pub costs: BTreeMap<&'static str, u64>,
    /// Last change time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// HTTP status for a redemption outcome.
#[must_use]
pub const fn claim_status(response: &ClaimResponse) -> StatusCode {
    match response {
        ClaimResponse::Redeemed { .. } => StatusCode::OK,
        ClaimResponse::InsufficientPoints { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ClaimResponse::NoCouponAvailable => StatusCode::CONFLICT,
        ClaimResponse::MemberNotFound => StatusCode::NOT_FOUND,
        ClaimResponse::InvalidTier { .. } | ClaimResponse::InvalidArgument { .. } => {
            StatusCode::BAD_REQUEST
        }
        ClaimResponse::Forbidden { .. } => StatusCode::FORBIDDEN,
        ClaimResponse::TransactionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Redeem points of the caller for a coupon.
///
/// ```text
/// POST /api/redeem
/// {"tier": "20%"}
/// ```
pub async fn redeem<S: DocumentStore>(
    State(state): State<AppState<S>>,
    correlation_id: CorrelationId,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<RedeemRequest>,
) -> (StatusCode, Json<ClaimResponse>) {
    let response = state.service.claim(&caller.member_id(), &request.tier).await;
    tracing::info!(
        correlation_id = %correlation_id.0,
        member_id = %caller.id,
        status = response.status(),
        "Redeem request handled"
    );
    (claim_status(&response), Json(response))
}

/// Run a command as the caller.
///
/// ```text
/// POST /api/commands
/// {"type": "adjust_points", "memberId": "VG7", "kind": "add", "amount": 50, "reason": "Compra"}
/// ```
///
/// # Errors
///
/// 403 for admin commands from members, 400 for invalid input, 503 when the
/// store fails.
pub async fn command<S: DocumentStore>(
    State(state): State<AppState<S>>,
    correlation_id: CorrelationId,
    CallerIdentity(caller): CallerIdentity,
    Json(command): Json<LoyaltyCommand>,
) -> WebResult<Json<CommandResult>> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        caller = %caller.id,
        command = command.name(),
        "Command received"
    );
    let result = state.service.execute(&caller, command).await?;
    Ok(Json(result))
}

/// The caller's own member summary.
///
/// # Errors
///
/// 404 `MEMBER_NOT_FOUND` when the caller has no member document.
pub async fn me<S: DocumentStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
) -> WebResult<Json<MemberSummary>> {
    state
        .service
        .member_summary(&caller.member_id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("MEMBER_NOT_FOUND", "Member not found"))
}

/// The caller's movements, newest first.
///
/// # Errors
///
/// 400 for a zero limit, 503 when the store fails.
pub async fn movements<S: DocumentStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(caller): CallerIdentity,
    Query(params): Query<MovementsParams>,
) -> WebResult<Json<Vec<LedgerEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_MOVEMENTS_LIMIT);
    if limit == 0 {
        return Err(AppError::bad_request("limit must be positive"));
    }
    let entries = state.service.movements(&caller.member_id(), limit).await?;
    Ok(Json(entries))
}

/// Current tier costs.
///
/// # Errors
///
/// 503 when the store fails.
pub async fn pricing<S: DocumentStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
) -> WebResult<Json<PricingView>> {
    let config = state.service.pricing().await?;
    let costs = config
        .all_costs()
        .into_iter()
        .map(|(tier, cost)| (tier.as_str(), cost))
        .collect();
    Ok(Json(PricingView {
        costs,
        updated_at: config.updated_at,
    }))
}

/// Available coupons per tier.
///
/// # Errors
///
/// 503 when the store fails.
pub async fn coupon_stock<S: DocumentStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(_caller): CallerIdentity,
) -> WebResult<Json<BTreeMap<&'static str, usize>>> {
    let stock = state.service.coupon_stock().await?;
    Ok(Json(
        stock
            .into_iter()
            .map(|(tier, count)| (tier.as_str(), count))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_status_mapping() {
        let cases = [
            (
                ClaimResponse::Redeemed {
                    code: "A".into(),
                    new_points: 1,
                    cost: 1,
                },
                StatusCode::OK,
            ),
            (
                ClaimResponse::InsufficientPoints { need: 2, have: 1 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ClaimResponse::NoCouponAvailable, StatusCode::CONFLICT),
            (ClaimResponse::MemberNotFound, StatusCode::NOT_FOUND),
            (
                ClaimResponse::InvalidTier { input: "30".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClaimResponse::InvalidArgument {
                    message: "member id is required".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClaimResponse::Forbidden {
                    message: "no".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ClaimResponse::TransactionFailed {
                    message: "retry".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (response, status) in cases {
            assert_eq!(claim_status(&response), status, "{response:?}");
        }
    }
}
