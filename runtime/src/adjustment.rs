//! Administrative point adjustments.

use crate::error::LoyaltyError;
use crate::ledger::{self, Movement};
use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Member, MemberId, MovementKind};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, TransactionExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest balance an adjustment may produce.
pub const MAX_BALANCE: u64 = 1_000_000_000;

/// How `amount` is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Credit `amount`.
    Add,
    /// Debit `amount`; never below zero.
    Subtract,
    /// Overwrite the balance with `amount`.
    Set,
}

impl AdjustmentKind {
    /// Ledger movement kind this adjustment records.
    #[must_use]
    pub const fn movement(self) -> MovementKind {
        match self {
            Self::Add => MovementKind::PointsAdd,
            Self::Subtract => MovementKind::PointsSubtract,
            Self::Set => MovementKind::PointsSet,
        }
    }
}

/// Adjustment request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPoints {
    /// Member to adjust.
    pub member_id: MemberId,
    /// Operation.
    pub kind: AdjustmentKind,
    /// Points to add, subtract, or set.
    pub amount: u64,
    /// Reason recorded on the member and in the ledger.
    pub reason: String,
}

impl AdjustPoints {
    /// Check the request before touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] for an empty member id or
    /// reason, a zero add/subtract, or an amount above [`MAX_BALANCE`].
    pub fn validate(&self) -> Result<(), LoyaltyError> {
        if self.member_id.as_str().trim().is_empty() {
            return Err(LoyaltyError::invalid("memberId is required"));
        }
        if self.reason.trim().is_empty() {
            return Err(LoyaltyError::invalid("reason is required"));
        }
        if self.amount == 0 && self.kind != AdjustmentKind::Set {
            return Err(LoyaltyError::invalid("amount must be greater than zero"));
        }
        if self.amount > MAX_BALANCE {
            return Err(LoyaltyError::invalid(format!(
                "amount must not exceed {MAX_BALANCE}"
            )));
        }
        Ok(())
    }
}

/// Result of an adjustment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AdjustOutcome {
    /// Balance changed and a movement was recorded.
    Adjusted {
        /// Adjusted member.
        member_id: MemberId,
        /// Member email.
        email: String,
        /// Movement kind recorded.
        kind: MovementKind,
        /// Balance before.
        previous_points: u64,
        /// Balance after.
        new_points: u64,
    },
    /// A `set` to the current balance; nothing written.
    Unchanged {
        /// Current balance.
        points: u64,
    },
    /// A subtract larger than the balance.
    InsufficientPoints {
        /// Requested debit.
        need: u64,
        /// Current balance.
        have: u64,
    },
    /// The result would exceed [`MAX_BALANCE`].
    BalanceLimitExceeded {
        /// The limit.
        limit: u64,
    },
    /// No such member.
    MemberNotFound,
}

/// New balance for `kind`/`amount`, or the outcome that prevents it.
///
/// # Errors
///
/// Returns the blocking [`AdjustOutcome`] (insufficient points or limit).
pub fn apply(kind: AdjustmentKind, current: u64, amount: u64) -> Result<u64, AdjustOutcome> {
    let next = match kind {
        AdjustmentKind::Add => current.checked_add(amount),
        AdjustmentKind::Subtract => {
            return current.checked_sub(amount).ok_or(AdjustOutcome::InsufficientPoints {
                need: amount,
                have: current,
            });
        }
        AdjustmentKind::Set => Some(amount),
    };

    match next {
        Some(points) if points <= MAX_BALANCE => Ok(points),
        _ => Err(AdjustOutcome::BalanceLimitExceeded { limit: MAX_BALANCE }),
    }
}

/// Apply a validated adjustment in one transaction.
///
/// # Errors
///
/// Returns the store error when the transaction cannot commit.
pub async fn adjust_points<S: DocumentStore>(
    store: &S,
    clock: Arc<dyn Clock>,
    request: AdjustPoints,
    actor: &str,
) -> Result<AdjustOutcome, StoreError> {
    let actor = actor.to_string();

    store
        .run_transaction(move |tx| {
            let request = request.clone();
            let actor = actor.clone();
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                let key = DocumentKey::new(Collection::Members, request.member_id.as_str());
                let Some(mut member) = tx.get_as::<Member>(key.clone()).await? else {
                    return Ok(AdjustOutcome::MemberNotFound);
                };

                let previous_points = member.puntos;
                let new_points = match apply(request.kind, previous_points, request.amount) {
                    Ok(points) => points,
                    Err(blocked) => return Ok(blocked),
                };
                if new_points == previous_points {
                    return Ok(AdjustOutcome::Unchanged {
                        points: previous_points,
                    });
                }

                let now = clock.now();
                let reason = request.reason.trim();
                member.apply_balance(new_points, reason, now);
                tx.set_as(key, &member)?;
                ledger::stage(
                    tx,
                    &Movement {
                        member_id: &request.member_id,
                        email: &member.email,
                        kind: request.kind.movement(),
                        previous_points,
                        new_points,
                        reason,
                        actor: &actor,
                        at: now,
                    },
                )?;

                Ok(AdjustOutcome::Adjusted {
                    member_id: request.member_id.clone(),
                    email: member.email.clone(),
                    kind: request.kind.movement(),
                    previous_points,
                    new_points,
                })
            })
        })
        .await
}
