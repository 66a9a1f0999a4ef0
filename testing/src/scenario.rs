//! Given-When-Then harness for redemptions.
//!
//! Seeds an [`InMemoryDocumentStore`], sends one claim through a
//! [`LoyaltyService`] and runs assertions against the response and the
//! committed documents.

#![allow(clippy::module_name_repetitions)]

use crate::fixtures;
use crate::memory::InMemoryDocumentStore;
use crate::mocks::{RecordingNotifier, test_clock};
use fidelidad_core::environment::Clock;
use fidelidad_core::model::MemberId;
use fidelidad_core::tier::DiscountTier;
use fidelidad_runtime::outcome::ClaimResponse;
use fidelidad_runtime::service::LoyaltyService;
use std::sync::Arc;

type ResponseAssertion = Box<dyn FnOnce(&ClaimResponse)>;
type StoreAssertion = Box<dyn FnOnce(&InMemoryDocumentStore)>;

/// Fluent redemption test.
///
/// # Example
///
/// ```ignore
/// RedemptionScenario::new()
///     .given_cost(DiscountTier::Percent10, 50)
///     .given_member("VG1", 40)
///     .when_claiming("VG1", "10")
///     .then_response(|response| {
///         assert_eq!(response.error_code(), Some("INSUFFICIENT_POINTS"));
///     })
///     .then_store(|store| assertions::assert_points(store, "VG1", 40))
///     .run()
///     .await;
/// ```
pub struct RedemptionScenario {
    costs: Vec<(DiscountTier, u64)>,
    members: Vec<(String, u64)>,
    coupons: Vec<(DiscountTier, Vec<String>)>,
    claim: Option<(String, String)>,
    response_assertions: Vec<ResponseAssertion>,
    store_assertions: Vec<StoreAssertion>,
}

impl Default for RedemptionScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl RedemptionScenario {
    /// Empty scenario.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            costs: Vec::new(),
            members: Vec::new(),
            coupons: Vec::new(),
            claim: None,
            response_assertions: Vec::new(),
            store_assertions: Vec::new(),
        }
    }

    /// Price `tier` at `cost` points (Given)
    #[must_use]
    pub fn given_cost(mut self, tier: DiscountTier, cost: u64) -> Self {
        self.costs.push((tier, cost));
        self
    }

    /// Seed a member with `puntos` points (Given)
    #[must_use]
    pub fn given_member(mut self, id: &str, puntos: u64) -> Self {
        self.members.push((id.to_string(), puntos));
        self
    }

    /// Seed available coupons of `tier` (Given)
    #[must_use]
    pub fn given_coupons(mut self, tier: DiscountTier, codes: &[&str]) -> Self {
        self.coupons
            .push((tier, codes.iter().map(ToString::to_string).collect()));
        self
    }

    /// Claim with raw tier input on behalf of `member_id` (When)
    #[must_use]
    pub fn when_claiming(mut self, member_id: &str, tier_input: &str) -> Self {
        self.claim = Some((member_id.to_string(), tier_input.to_string()));
        self
    }

    /// Add an assertion about the response (Then)
    #[must_use]
    pub fn then_response<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&ClaimResponse) + 'static,
    {
        self.response_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the committed documents (Then)
    #[must_use]
    pub fn then_store<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&InMemoryDocumentStore) + 'static,
    {
        self.store_assertions.push(Box::new(assertion));
        self
    }

    /// Seed, claim and run every assertion.
    ///
    /// # Panics
    ///
    /// Panics if no claim was set, if seeding fails, or if any assertion fails.
    #[allow(clippy::panic)]
    #[allow(clippy::expect_used)]
    pub async fn run(self) {
        let (member_id, tier_input) = self.claim.expect("Claim must be set with when_claiming()");

        let clock = test_clock();
        let store = Arc::new(InMemoryDocumentStore::new());
        if !self.costs.is_empty() {
            fixtures::seed_pricing(&store, &self.costs).expect("seed pricing");
        }
        for (id, puntos) in &self.members {
            fixtures::seed_member(&store, id, *puntos).expect("seed member");
        }
        for (tier, codes) in &self.coupons {
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            fixtures::seed_coupons(&store, *tier, &codes, clock.now()).expect("seed coupons");
        }

        let service = LoyaltyService::new(Arc::clone(&store))
            .with_clock(Arc::new(clock))
            .with_notifier(Arc::new(RecordingNotifier::new()));
        let response = service
            .claim(&MemberId::new(member_id), &tier_input)
            .await;

        for assertion in self.response_assertions {
            assertion(&response);
        }
        for assertion in self.store_assertions {
            assertion(&store);
        }
    }
}

/// Helper assertions on committed documents.
pub mod assertions {
    use crate::fixtures::coupon_id;
    use crate::memory::InMemoryDocumentStore;
    use fidelidad_core::model::{Coupon, LedgerEntry, Member};
    use fidelidad_core::store::{Collection, DocumentKey};

    /// Assert a member's committed balance.
    ///
    /// # Panics
    ///
    /// Panics if the member is missing or the balance differs.
    #[allow(clippy::expect_used)]
    pub fn assert_points(store: &InMemoryDocumentStore, member_id: &str, expected: u64) {
        let document = store
            .document(&DocumentKey::new(Collection::Members, member_id))
            .expect("store readable")
            .expect("member exists");
        let member: Member = serde_json::from_value(document).expect("member decodes");
        assert_eq!(
            member.puntos, expected,
            "Expected {member_id} to have {expected} points, found {}",
            member.puntos
        );
    }

    /// Assert whether the seeded coupon with `code` is still available.
    ///
    /// # Panics
    ///
    /// Panics if the coupon is missing or its availability differs.
    #[allow(clippy::expect_used)]
    pub fn assert_available(store: &InMemoryDocumentStore, code: &str, expected: bool) {
        let document = store
            .document(&DocumentKey::new(Collection::Coupons, coupon_id(code)))
            .expect("store readable")
            .expect("coupon exists");
        let coupon: Coupon = serde_json::from_value(document).expect("coupon decodes");
        assert_eq!(
            coupon.disponible, expected,
            "Expected coupon {code} availability to be {expected}"
        );
    }

    /// All committed ledger entries.
    ///
    /// # Panics
    ///
    /// Panics if the store is unreadable or an entry does not decode.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn ledger(store: &InMemoryDocumentStore) -> Vec<LedgerEntry> {
        store
            .documents(Collection::Ledger)
            .expect("store readable")
            .into_iter()
            .map(|doc| doc.decode().expect("ledger entry decodes"))
            .collect()
    }

    /// Assert the number of ledger entries.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_ledger_len(store: &InMemoryDocumentStore, expected: usize) {
        let entries = ledger(store);
        assert_eq!(
            entries.len(),
            expected,
            "Expected {expected} ledger entries, found {}: {entries:?}",
            entries.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn redeems_when_everything_lines_up() {
        RedemptionScenario::new()
            .given_cost(DiscountTier::Percent20, 100)
            .given_member("VG1", 150)
            .given_coupons(DiscountTier::Percent20, &["VG20-A"])
            .when_claiming("VG1", "20%")
            .then_response(|response| {
                assert_eq!(
                    response,
                    &ClaimResponse::Redeemed {
                        code: "VG20-A".into(),
                        new_points: 50,
                        cost: 100
                    }
                );
            })
            .then_store(|store| {
                assertions::assert_points(store, "VG1", 50);
                assertions::assert_available(store, "VG20-A", false);
                assertions::assert_ledger_len(store, 1);
            })
            .run()
            .await;
    }

    #[tokio::test]
    async fn short_balance_leaves_store_untouched() {
        RedemptionScenario::new()
            .given_cost(DiscountTier::Percent10, 50)
            .given_member("VG2", 40)
            .given_coupons(DiscountTier::Percent10, &["VG10-A"])
            .when_claiming("VG2", "10")
            .then_response(|response| {
                assert_eq!(response.error_code(), Some("INSUFFICIENT_POINTS"));
            })
            .then_store(|store| {
                assertions::assert_points(store, "VG2", 40);
                assertions::assert_available(store, "VG10-A", true);
                assertions::assert_ledger_len(store, 0);
            })
            .run()
            .await;
    }
}
