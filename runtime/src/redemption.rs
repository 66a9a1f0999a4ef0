//! Redemption transaction.
//!
//! One attempt, inside one store transaction:
//!
//! 1. resolve the tier cost
//! 2. read the member (absent: `MemberNotFound`)
//! 3. check the balance (short: `InsufficientPoints`)
//! 4. allocate a coupon (none: `NoCouponAvailable`)
//! 5. buffer the member debit, the coupon consumption and one ledger entry
//!
//! The body only reads and buffers writes, so the store may run it any
//! number of times. Double spend and double issuance are prevented by the
//! store's commit validation on the member and coupon documents; there are
//! no locks or compensations here.

use crate::allocator::{self, Allocation, StaleCandidatePolicy};
use crate::ledger::{self, Movement};
use crate::outcome::RedeemOutcome;
use crate::pricing;
use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Member, MemberId, MovementKind};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, TransactionExt};
use fidelidad_core::tier::DiscountTier;
use std::sync::Arc;

/// Ledger reason recorded for a redemption of `tier`.
#[must_use]
pub fn redemption_reason(tier: DiscountTier) -> String {
    format!("Canje cupón {}", tier.label())
}

/// Run the redemption transaction for `member_id`.
///
/// # Errors
///
/// Returns the store error when the transaction cannot commit, including
/// [`StoreError::RetriesExhausted`] under sustained contention.
pub async fn redeem<S: DocumentStore>(
    store: &Arc<S>,
    clock: &Arc<dyn Clock>,
    stale_policy: StaleCandidatePolicy,
    member_id: &MemberId,
    tier: DiscountTier,
) -> Result<RedeemOutcome, StoreError> {
    let body_store = Arc::clone(store);
    let clock = Arc::clone(clock);
    let member_id = member_id.clone();

    store
        .run_transaction(move |tx| {
            let store = Arc::clone(&body_store);
            let clock = Arc::clone(&clock);
            let member_id = member_id.clone();
            Box::pin(async move {
                attempt(&*store, tx, &*clock, stale_policy, &member_id, tier).await
            })
        })
        .await
}

async fn attempt<S: DocumentStore>(
    store: &S,
    tx: &mut S::Tx,
    clock: &dyn Clock,
    stale_policy: StaleCandidatePolicy,
    member_id: &MemberId,
    tier: DiscountTier,
) -> Result<RedeemOutcome, StoreError> {
    let cost = pricing::resolve_cost(tx, tier).await?;

    let member_key = DocumentKey::new(Collection::Members, member_id.as_str());
    let Some(mut member) = tx.get_as::<Member>(member_key.clone()).await? else {
        return Ok(RedeemOutcome::MemberNotFound);
    };

    let previous_points = member.puntos;
    let Some(new_points) = previous_points.checked_sub(cost) else {
        return Ok(RedeemOutcome::InsufficientPoints {
            need: cost,
            have: previous_points,
        });
    };

    let (coupon_key, mut coupon) = match allocator::find_available(store, tx, tier).await? {
        Allocation::Claimable { key, coupon } => (key, coupon),
        Allocation::Exhausted => return Ok(RedeemOutcome::NoCouponAvailable),
        Allocation::Stale { key } => {
            return match stale_policy {
                StaleCandidatePolicy::Fail => Ok(RedeemOutcome::NoCouponAvailable),
                StaleCandidatePolicy::Retry => {
                    Err(StoreError::conflict(format!("stale coupon candidate {key}")))
                }
            };
        }
    };

    let now = clock.now();
    let reason = redemption_reason(tier);

    member.apply_balance(new_points, &reason, now);
    coupon.consume(member_id, &member.email, now);

    tx.set_as(member_key, &member)?;
    tx.set_as(coupon_key.clone(), &coupon)?;
    ledger::stage(
        tx,
        &Movement {
            member_id,
            email: &member.email,
            kind: MovementKind::PointsSubtract,
            previous_points,
            new_points,
            reason: &reason,
            actor: member_id.as_str(),
            at: now,
        },
    )?;

    Ok(RedeemOutcome::Redeemed {
        code: coupon.codigo,
        coupon_id: coupon_key.id,
        email: member.email,
        new_points,
        cost,
    })
}
