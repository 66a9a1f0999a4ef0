//! Tier pricing.
//!
//! The redemption path only ever reads the pricing singleton, and always
//! through the active transaction so a concurrent price change conflicts
//! with in-flight redemptions instead of being half-applied.

use crate::error::LoyaltyError;
use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::PricingConfig;
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Transaction, TransactionExt};
use fidelidad_core::tier::DiscountTier;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound for a single tier cost.
pub const MAX_TIER_COST: u64 = 1_000_000;

/// Key of the pricing singleton.
#[must_use]
pub fn pricing_key() -> DocumentKey {
    DocumentKey::new(Collection::Pricing, PricingConfig::DOCUMENT_ID)
}

/// Cost of `tier` as seen by the transaction snapshot.
///
/// A missing pricing document or a tier absent from it costs 0.
///
/// # Errors
///
/// Returns the store error from the read, or [`StoreError::Serialization`]
/// if the pricing document is malformed.
pub async fn resolve_cost<Tx>(tx: &mut Tx, tier: DiscountTier) -> Result<u64, StoreError>
where
    Tx: Transaction + ?Sized,
{
    let pricing: Option<PricingConfig> = tx.get_as(pricing_key()).await?;
    Ok(pricing.map_or(0, |pricing| pricing.cost_of(tier)))
}

/// Current pricing, outside any transaction.
///
/// # Errors
///
/// Returns the store error from the read or decode.
pub async fn load_pricing<S: DocumentStore>(store: &S) -> Result<PricingConfig, StoreError> {
    match store.get(pricing_key()).await? {
        Some(document) => Ok(serde_json::from_value(document)?),
        None => Ok(PricingConfig::default()),
    }
}

/// Parse caller-supplied `tier -> cost` pairs.
///
/// # Errors
///
/// - [`LoyaltyError::InvalidTier`] for an unknown tier
/// - [`LoyaltyError::InvalidArgument`] for an empty map, a duplicate tier
///   after normalization, or a cost above [`MAX_TIER_COST`]
pub fn parse_costs(raw: &BTreeMap<String, u64>) -> Result<BTreeMap<DiscountTier, u64>, LoyaltyError> {
    if raw.is_empty() {
        return Err(LoyaltyError::invalid("at least one tier cost is required"));
    }

    let mut costs = BTreeMap::new();
    for (input, &cost) in raw {
        let tier: DiscountTier = input.parse()?;
        if cost > MAX_TIER_COST {
            return Err(LoyaltyError::invalid(format!(
                "cost for tier {tier} exceeds {MAX_TIER_COST}"
            )));
        }
        if costs.insert(tier, cost).is_some() {
            return Err(LoyaltyError::invalid(format!("tier {tier} given twice")));
        }
    }
    Ok(costs)
}

/// Overwrite the costs of the given tiers, keeping the others.
///
/// # Errors
///
/// Returns the store error if the transaction fails.
pub async fn set_pricing<S: DocumentStore>(
    store: &S,
    clock: Arc<dyn Clock>,
    costs: BTreeMap<DiscountTier, u64>,
    actor: &str,
) -> Result<PricingConfig, StoreError> {
    let actor = actor.to_string();

    store
        .run_transaction(move |tx| {
            let costs = costs.clone();
            let actor = actor.clone();
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                let mut pricing: PricingConfig =
                    tx.get_as(pricing_key()).await?.unwrap_or_default();

                for (tier, cost) in costs {
                    pricing.costs.insert(tier.as_str().to_string(), cost);
                }
                pricing.updated_at = Some(clock.now());
                pricing.updated_by = Some(actor);

                tx.set_as(pricing_key(), &pricing)?;
                Ok(pricing)
            })
        })
        .await
}
