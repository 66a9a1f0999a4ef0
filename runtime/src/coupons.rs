//! Coupon stock administration.

use crate::allocator::available_query;
use crate::error::LoyaltyError;
use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Coupon, CouponCodeIndex};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Transaction, TransactionExt};
use fidelidad_core::tier::DiscountTier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Largest batch accepted by [`create_coupons`].
pub const MAX_BATCH: usize = 500;

/// Longest accepted coupon code.
pub const MAX_CODE_LEN: usize = 64;

/// Validated batch of codes for one tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponBatch {
    tier: DiscountTier,
    codes: Vec<String>,
}

impl CouponBatch {
    /// Validate a batch: trimmed codes, non-empty, unique, at most [`MAX_BATCH`].
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] describing the first problem.
    pub fn new(tier: DiscountTier, codes: Vec<String>) -> Result<Self, LoyaltyError> {
        if codes.is_empty() {
            return Err(LoyaltyError::invalid("at least one code is required"));
        }
        if codes.len() > MAX_BATCH {
            return Err(LoyaltyError::invalid(format!(
                "at most {MAX_BATCH} codes per batch"
            )));
        }

        let mut seen = HashSet::with_capacity(codes.len());
        let mut normalized = Vec::with_capacity(codes.len());
        for raw in codes {
            let code = raw.trim().to_string();
            if code.is_empty() {
                return Err(LoyaltyError::invalid("codes must not be empty"));
            }
            if code.len() > MAX_CODE_LEN || code.chars().any(|c| c.is_whitespace() || c == '/') {
                return Err(LoyaltyError::invalid(format!("invalid code: {code:?}")));
            }
            if !seen.insert(code.clone()) {
                return Err(LoyaltyError::invalid(format!("code {code} repeated in batch")));
            }
            normalized.push(code);
        }

        Ok(Self {
            tier,
            codes: normalized,
        })
    }

    /// Tier of the batch.
    #[must_use]
    pub const fn tier(&self) -> DiscountTier {
        self.tier
    }

    /// Codes of the batch.
    #[must_use]
    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}

/// Result of a batch creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CreateCouponsOutcome {
    /// All coupons written.
    Created {
        /// Tier of the new coupons.
        tier: DiscountTier,
        /// Number of coupons written.
        count: usize,
    },
    /// A code was already issued; nothing written.
    DuplicateCode {
        /// The offending code.
        code: String,
    },
}

/// Create every coupon of `batch` or none of them.
///
/// # Errors
///
/// Returns the store error when the transaction cannot commit.
pub async fn create_coupons<S: DocumentStore>(
    store: &S,
    clock: Arc<dyn Clock>,
    batch: CouponBatch,
) -> Result<CreateCouponsOutcome, StoreError> {
    store
        .run_transaction(move |tx| {
            let batch = batch.clone();
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                for code in batch.codes() {
                    let index_key = DocumentKey::new(Collection::CouponCodes, code.as_str());
                    if tx.get(index_key).await?.is_some() {
                        return Ok(CreateCouponsOutcome::DuplicateCode { code: code.clone() });
                    }
                }

                let now = clock.now();
                for code in batch.codes() {
                    let coupon_key = DocumentKey::generated(Collection::Coupons);
                    tx.set_as(
                        DocumentKey::new(Collection::CouponCodes, code.as_str()),
                        &CouponCodeIndex {
                            coupon_id: coupon_key.id.clone(),
                            descuento: batch.tier(),
                        },
                    )?;
                    tx.set_as(coupon_key, &Coupon::new(batch.tier(), code.as_str(), now))?;
                }

                Ok(CreateCouponsOutcome::Created {
                    tier: batch.tier(),
                    count: batch.codes().len(),
                })
            })
        })
        .await
}

/// Available coupons per tier, every tier present.
///
/// # Errors
///
/// Returns the store error from the queries.
pub async fn coupon_stock<S: DocumentStore>(store: &S) -> Result<BTreeMap<DiscountTier, usize>, StoreError> {
    let mut stock = BTreeMap::new();
    for tier in DiscountTier::ALL {
        let available = store.query(available_query(tier)).await?;
        stock.insert(tier, available.len());
    }
    Ok(stock)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn batch_trims_codes() {
        let batch = CouponBatch::new(DiscountTier::Percent15, codes(&[" A1 ", "B2"])).unwrap();
        assert_eq!(batch.codes(), ["A1", "B2"]);
        assert_eq!(batch.tier(), DiscountTier::Percent15);
    }

    #[test]
    fn batch_rejects_invalid_input() {
        assert!(CouponBatch::new(DiscountTier::Percent10, Vec::new()).is_err());
        assert!(CouponBatch::new(DiscountTier::Percent10, codes(&["A", " "])).is_err());
        assert!(CouponBatch::new(DiscountTier::Percent10, codes(&["A", " A"])).is_err());
        assert!(CouponBatch::new(DiscountTier::Percent10, codes(&["A B"])).is_err());
        assert!(CouponBatch::new(DiscountTier::Percent10, codes(&["A/B"])).is_err());

        let too_many: Vec<String> = (0..=MAX_BATCH).map(|i| format!("C{i}")).collect();
        assert!(CouponBatch::new(DiscountTier::Percent10, too_many).is_err());

        let exactly_max: Vec<String> = (0..MAX_BATCH).map(|i| format!("C{i}")).collect();
        assert!(CouponBatch::new(DiscountTier::Percent10, exactly_max).is_ok());
    }
}
