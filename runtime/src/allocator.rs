//! Coupon allocation.
//!
//! Queries are not part of the read set, so allocation is two steps: a
//! point-in-time claim query for one available coupon of the tier, then a
//! transactional re-read of that candidate. The re-read puts the coupon in
//! the transaction's read set; if a concurrent redemption consumes it first,
//! the commit conflicts and the store re-runs the whole body.

use fidelidad_core::error::StoreError;
use fidelidad_core::model::Coupon;
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Query, TransactionExt};
use fidelidad_core::tier::DiscountTier;
use serde::{Deserialize, Serialize};

/// Result of looking for a coupon to claim.
#[derive(Clone, Debug, PartialEq)]
pub enum Allocation {
    /// The candidate is available in the transaction snapshot.
    Claimable {
        /// Coupon document key.
        key: DocumentKey,
        /// Coupon as read in the transaction.
        coupon: Coupon,
    },
    /// The query found no available coupon of the tier.
    Exhausted,
    /// The query returned a candidate the snapshot shows as consumed,
    /// missing, or of another tier.
    Stale {
        /// Key of the rejected candidate.
        key: DocumentKey,
    },
}

/// What a redemption does with a [`Allocation::Stale`] candidate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleCandidatePolicy {
    /// Report no coupon available for this request.
    #[default]
    Fail,
    /// Ask the store to re-run the transaction with a fresh snapshot.
    Retry,
}

/// Query for available coupons of `tier`, oldest id first.
#[must_use]
pub fn available_query(tier: DiscountTier) -> Query {
    Query::new(Collection::Coupons)
        .where_eq("descuento", tier.as_str())
        .where_eq("disponible", true)
}

/// Find one claimable coupon of `tier`.
///
/// Only the first query result is considered; other candidates are not
/// tried within the same attempt.
///
/// # Errors
///
/// Returns the store error from the query or the re-read.
pub async fn find_available<S: DocumentStore>(
    store: &S,
    tx: &mut S::Tx,
    tier: DiscountTier,
) -> Result<Allocation, StoreError> {
    let candidates = store.claim_query(tx, available_query(tier).limit(1)).await?;
    let Some(candidate) = candidates.into_iter().next() else {
        return Ok(Allocation::Exhausted);
    };

    let current: Option<Coupon> = tx.get_as(candidate.key.clone()).await?;
    match current {
        Some(coupon) if coupon.disponible && coupon.descuento == tier => Ok(Allocation::Claimable {
            key: candidate.key,
            coupon,
        }),
        _ => {
            tracing::debug!(coupon = %candidate.key, tier = %tier, "Coupon candidate is stale");
            Ok(Allocation::Stale { key: candidate.key })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn available_query_filters_tier_and_availability() {
        let query = available_query(DiscountTier::FreeShipping);
        assert_eq!(
            query.filter_object(),
            json!({"descuento": "envio_gratis", "disponible": true})
        );
        assert_eq!(query.limit, None);
    }

    #[test]
    fn stale_policy_defaults_to_fail() {
        assert_eq!(StaleCandidatePolicy::default(), StaleCandidatePolicy::Fail);
        let parsed: StaleCandidatePolicy = serde_json::from_value(json!("retry")).unwrap();
        assert_eq!(parsed, StaleCandidatePolicy::Retry);
    }
}
