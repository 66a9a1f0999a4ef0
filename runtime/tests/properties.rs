//! Property tests for tier parsing, redemption arithmetic and the ledger.

use fidelidad_core::environment::Clock;
use fidelidad_core::model::MemberId;
use fidelidad_core::tier::DiscountTier;
use fidelidad_runtime::adjustment::{self, AdjustOutcome, AdjustPoints, AdjustmentKind};
use fidelidad_runtime::{ClaimResponse, LoyaltyService};
use fidelidad_testing::fixtures::{seed_coupons, seed_member, seed_pricing};
use fidelidad_testing::properties::{any_tier, balance_and_cost, tier_spelling};
use fidelidad_testing::scenario::assertions::{assert_available, assert_points, ledger};
use fidelidad_testing::{InMemoryDocumentStore, RecordingNotifier, test_clock};
use proptest::prelude::*;
use std::sync::Arc;

fn service(store: &Arc<InMemoryDocumentStore>) -> LoyaltyService<InMemoryDocumentStore> {
    LoyaltyService::new(Arc::clone(store))
        .with_clock(Arc::new(test_clock()))
        .with_notifier(Arc::new(RecordingNotifier::new()))
}

fn adjustment_kind() -> impl Strategy<Value = AdjustmentKind> {
    prop_oneof![
        Just(AdjustmentKind::Add),
        Just(AdjustmentKind::Subtract),
        Just(AdjustmentKind::Set),
    ]
}

proptest! {
    #[test]
    fn every_spelling_parses_to_its_tier(
        (tier, spelling) in any_tier().prop_flat_map(|tier| (Just(tier), tier_spelling(tier)))
    ) {
        prop_assert_eq!(spelling.parse::<DiscountTier>(), Ok(tier));
    }

    #[test]
    fn redemption_debits_exactly_the_cost((balance, cost) in balance_and_cost()) {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed_pricing(&store, &[(DiscountTier::Percent15, cost)]).unwrap();
        seed_member(&store, "VG1", balance).unwrap();
        seed_coupons(&store, DiscountTier::Percent15, &["C"], test_clock().now()).unwrap();

        let response = tokio_test::block_on(service(&store).claim(&MemberId::new("VG1"), "15"));

        if balance >= cost {
            prop_assert_eq!(
                response,
                ClaimResponse::Redeemed { code: "C".into(), new_points: balance - cost, cost }
            );
            assert_points(&store, "VG1", balance - cost);
            assert_available(&store, "C", false);
            let entries = ledger(&store);
            prop_assert_eq!(entries.len(), 1);
            prop_assert_eq!(entries[0].delta, -i64::try_from(cost).unwrap());
        } else {
            prop_assert_eq!(response, ClaimResponse::InsufficientPoints { need: cost, have: balance });
            assert_points(&store, "VG1", balance);
            assert_available(&store, "C", true);
            prop_assert!(ledger(&store).is_empty());
        }
    }

    #[test]
    fn ledger_replays_to_the_balance(
        initial in 0u64..1_000,
        steps in prop::collection::vec((adjustment_kind(), 0u64..500), 1..12)
    ) {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed_member(&store, "VG1", initial).unwrap();
        let service = service(&store);

        let mut expected = initial;
        for (kind, amount) in steps {
            let request = AdjustPoints {
                member_id: MemberId::new("VG1"),
                kind,
                amount,
                reason: "ajuste".into(),
            };
            if request.validate().is_err() {
                continue;
            }
            let outcome = tokio_test::block_on(service.adjust_points("admin-1", request)).unwrap();
            match adjustment::apply(kind, expected, amount) {
                Ok(next) if next == expected => {
                    prop_assert_eq!(outcome, AdjustOutcome::Unchanged { points: expected });
                }
                Ok(next) => {
                    prop_assert!(
                        matches!(outcome, AdjustOutcome::Adjusted { new_points, .. } if new_points == next),
                        "unexpected outcome {:?}",
                        outcome
                    );
                    expected = next;
                }
                Err(blocked) => prop_assert_eq!(outcome, blocked),
            }
        }

        assert_points(&store, "VG1", expected);
        let replayed = ledger(&store)
            .iter()
            .fold(i128::from(initial), |acc, entry| acc + i128::from(entry.delta));
        prop_assert_eq!(replayed, i128::from(expected));
    }
}
