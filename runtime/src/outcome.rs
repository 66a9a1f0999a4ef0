//! Caller-facing redemption results.
//!
//! [`RedeemOutcome`] is what the transaction body decides. [`ClaimResponse`]
//! is the stable contract handed to callers: a tagged union with a fixed
//! error code per failure, and no backend error text.

use crate::error::LoyaltyError;
use serde::{Deserialize, Serialize};

/// Message shown when the store fails or gives up.
pub const TRANSACTION_FAILED_MESSAGE: &str =
    "No se pudo completar el canje. Inténtalo de nuevo en unos segundos.";

/// Business result of one redemption transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Points debited and coupon consumed.
    Redeemed {
        /// Claimed coupon code.
        code: String,
        /// Claimed coupon id.
        coupon_id: String,
        /// Member email, for the notification.
        email: String,
        /// Balance after the debit.
        new_points: u64,
        /// Points debited.
        cost: u64,
    },
    /// Balance below the tier cost.
    InsufficientPoints {
        /// Tier cost.
        need: u64,
        /// Current balance.
        have: u64,
    },
    /// No claimable coupon of the tier.
    NoCouponAvailable,
    /// Caller has no member document.
    MemberNotFound,
}

impl RedeemOutcome {
    /// Short status label used in logs and metrics.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Redeemed { .. } => "redeemed",
            Self::InsufficientPoints { .. } => "insufficient_points",
            Self::NoCouponAvailable => "no_coupon_available",
            Self::MemberNotFound => "member_not_found",
        }
    }
}

/// Redemption result as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClaimResponse {
    /// Success.
    Redeemed {
        /// Coupon code to use at checkout.
        code: String,
        /// Balance after the debit.
        new_points: u64,
        /// Points debited.
        cost: u64,
    },
    /// Balance below the tier cost.
    InsufficientPoints {
        /// Tier cost.
        need: u64,
        /// Current balance.
        have: u64,
    },
    /// No coupon of the tier left.
    NoCouponAvailable,
    /// Caller is not a member.
    MemberNotFound,
    /// Tier input not recognized.
    InvalidTier {
        /// Input as received.
        input: String,
    },
    /// The request failed validation, e.g. a blank member id.
    InvalidArgument {
        /// What was wrong with the request.
        message: String,
    },
    /// The caller may not redeem.
    Forbidden {
        /// Why the caller was refused.
        message: String,
    },
    /// The store failed or gave up; safe to retry.
    TransactionFailed {
        /// Generic message for display.
        message: String,
    },
}

impl ClaimResponse {
    /// Map an operation result to the caller contract.
    #[must_use]
    pub fn from_result(result: Result<RedeemOutcome, LoyaltyError>) -> Self {
        match result {
            Ok(RedeemOutcome::Redeemed {
                code,
                new_points,
                cost,
                ..
            }) => Self::Redeemed {
                code,
                new_points,
                cost,
            },
            Ok(RedeemOutcome::InsufficientPoints { need, have }) => {
                Self::InsufficientPoints { need, have }
            }
            Ok(RedeemOutcome::NoCouponAvailable) => Self::NoCouponAvailable,
            Ok(RedeemOutcome::MemberNotFound) => Self::MemberNotFound,
            Err(LoyaltyError::InvalidTier(err)) => Self::InvalidTier {
                input: err.input().to_string(),
            },
            Err(LoyaltyError::InvalidArgument(message)) => Self::InvalidArgument { message },
            Err(LoyaltyError::Forbidden(message)) => Self::Forbidden { message },
            Err(LoyaltyError::Store(_)) => Self::TransactionFailed {
                message: TRANSACTION_FAILED_MESSAGE.to_string(),
            },
        }
    }

    /// Snake-case status, as serialized in the `status` tag.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Redeemed { .. } => "redeemed",
            Self::InsufficientPoints { .. } => "insufficient_points",
            Self::NoCouponAvailable => "no_coupon_available",
            Self::MemberNotFound => "member_not_found",
            Self::InvalidTier { .. } => "invalid_tier",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Forbidden { .. } => "forbidden",
            Self::TransactionFailed { .. } => "transaction_failed",
        }
    }

    /// Stable error code, `None` on success.
    #[must_use]
    pub const fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Redeemed { .. } => None,
            Self::InsufficientPoints { .. } => Some("INSUFFICIENT_POINTS"),
            Self::NoCouponAvailable => Some("NO_COUPON_AVAILABLE"),
            Self::MemberNotFound => Some("MEMBER_NOT_FOUND"),
            Self::InvalidTier { .. } => Some("INVALID_TIER"),
            Self::InvalidArgument { .. } => Some("INVALID_ARGUMENT"),
            Self::Forbidden { .. } => Some("FORBIDDEN"),
            Self::TransactionFailed { .. } => Some("TRANSACTION_FAILED"),
        }
    }

    /// Whether the redemption happened.
    #[must_use]
    pub const fn is_redeemed(&self) -> bool {
        matches!(self, Self::Redeemed { .. })
    }
}
