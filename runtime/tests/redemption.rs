//! Redemption transaction tests against the in-memory store.

use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Coupon, MemberId, MovementKind};
use fidelidad_core::store::{
    Collection, Document, DocumentKey, DocumentStore, Query, StoredDocument,
};
use fidelidad_core::tier::DiscountTier;
use fidelidad_runtime::notify::Notice;
use fidelidad_runtime::redemption::redemption_reason;
use fidelidad_runtime::retry::RetryPolicy;
use fidelidad_runtime::{ClaimResponse, LoyaltyService, RedeemOutcome, StaleCandidatePolicy};
use fidelidad_testing::fixtures::{coupon_id, email_for, seed_coupons, seed_member, seed_pricing};
use fidelidad_testing::scenario::assertions::{
    assert_available, assert_ledger_len, assert_points, ledger,
};
use fidelidad_testing::{
    FailingNotifier, InMemoryDocumentStore, InMemoryTransaction, RecordingNotifier, test_clock,
};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

fn service<S: DocumentStore>(store: &Arc<S>) -> LoyaltyService<S> {
    LoyaltyService::new(Arc::clone(store))
        .with_clock(Arc::new(test_clock()))
        .with_notifier(Arc::new(RecordingNotifier::new()))
}

fn seeded(cost: u64, members: &[(&str, u64)], codes: &[&str]) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::new());
    seed_pricing(&store, &[(DiscountTier::Percent20, cost)]).unwrap();
    for (id, puntos) in members {
        seed_member(&store, id, *puntos).unwrap();
    }
    seed_coupons(&store, DiscountTier::Percent20, codes, test_clock().now()).unwrap();
    store
}

fn coupon(store: &InMemoryDocumentStore, code: &str) -> Coupon {
    let document = store
        .document(&DocumentKey::new(Collection::Coupons, coupon_id(code)))
        .unwrap()
        .unwrap();
    serde_json::from_value(document).unwrap()
}

#[tokio::test]
async fn redeem_debits_consumes_and_records() {
    let store = seeded(20, &[("VG1", 50)], &["VG20-A"]);
    let response = service(&store).claim(&MemberId::new("VG1"), "20%").await;

    assert_eq!(
        response,
        ClaimResponse::Redeemed {
            code: "VG20-A".into(),
            new_points: 30,
            cost: 20
        }
    );
    assert_points(&store, "VG1", 30);

    let claimed = coupon(&store, "VG20-A");
    assert!(!claimed.disponible);
    assert_eq!(claimed.usado_por, Some(MemberId::new("VG1")));
    assert_eq!(claimed.usado_email, Some(email_for("VG1")));
    assert_eq!(claimed.usado_at, Some(test_clock().now()));

    let entries = ledger(&store);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.kind, MovementKind::PointsSubtract);
    assert_eq!(entry.delta, -20);
    assert_eq!(entry.previous_points, 50);
    assert_eq!(entry.new_points, 30);
    assert_eq!(entry.reason, redemption_reason(DiscountTier::Percent20));
    assert_eq!(entry.autor_uid, "VG1");
}

#[tokio::test]
async fn short_balance_writes_nothing() {
    let store = seeded(20, &[("VG1", 10)], &["VG20-A"]);
    let response = service(&store).claim(&MemberId::new("VG1"), "20").await;

    assert_eq!(response, ClaimResponse::InsufficientPoints { need: 20, have: 10 });
    assert_points(&store, "VG1", 10);
    assert_available(&store, "VG20-A", true);
    assert_ledger_len(&store, 0);
    assert_eq!(store.version(&DocumentKey::new(Collection::Members, "VG1")).unwrap(), Some(1));
}

#[tokio::test]
async fn exact_balance_is_enough() {
    let store = seeded(20, &[("VG1", 20)], &["VG20-A"]);
    let response = service(&store).claim(&MemberId::new("VG1"), "20").await;

    assert!(response.is_redeemed());
    assert_points(&store, "VG1", 0);
}

#[tokio::test]
async fn empty_stock_writes_nothing() {
    let store = seeded(20, &[("VG1", 50)], &[]);
    let response = service(&store).claim(&MemberId::new("VG1"), "20").await;

    assert_eq!(response, ClaimResponse::NoCouponAvailable);
    assert_points(&store, "VG1", 50);
    assert_ledger_len(&store, 0);
}

#[tokio::test]
async fn unknown_member_is_reported() {
    let store = seeded(20, &[], &["VG20-A"]);
    let response = service(&store).claim(&MemberId::new("VG404"), "20").await;

    assert_eq!(response, ClaimResponse::MemberNotFound);
    assert_available(&store, "VG20-A", true);
}

#[tokio::test]
async fn unknown_tier_never_opens_a_transaction() {
    let store = seeded(20, &[("VG1", 50)], &["VG20-A"]);
    let response = service(&store).claim(&MemberId::new("VG1"), "30%").await;

    assert_eq!(response, ClaimResponse::InvalidTier { input: "30%".into() });
    assert_eq!(store.transaction_attempts(), 0);
}

#[tokio::test]
async fn unpriced_tier_is_free() {
    let store = Arc::new(InMemoryDocumentStore::new());
    seed_member(&store, "VG1", 0).unwrap();
    seed_coupons(&store, DiscountTier::FreeShipping, &["ENVIO-A"], test_clock().now()).unwrap();

    let response = service(&store)
        .claim(&MemberId::new("VG1"), "Envío gratis")
        .await;

    assert_eq!(
        response,
        ClaimResponse::Redeemed {
            code: "ENVIO-A".into(),
            new_points: 0,
            cost: 0
        }
    );
    assert_eq!(ledger(&store)[0].delta, 0);
}

#[tokio::test]
async fn coupons_of_other_tiers_are_not_claimed() {
    let store = Arc::new(InMemoryDocumentStore::new());
    seed_member(&store, "VG1", 100).unwrap();
    seed_coupons(&store, DiscountTier::Percent10, &["VG10-A"], test_clock().now()).unwrap();

    let response = service(&store).claim(&MemberId::new("VG1"), "15").await;

    assert_eq!(response, ClaimResponse::NoCouponAvailable);
    assert_available(&store, "VG10-A", true);
}

#[tokio::test]
async fn unknown_member_fields_survive_the_debit() {
    let store = seeded(20, &[], &["VG20-A"]);
    let key = DocumentKey::new(Collection::Members, "VG7");
    store
        .insert(
            key.clone(),
            serde_json::json!({
                "email": "vg7@socios.vangogh.test",
                "puntos": 40,
                "telefono": "+34 600 000 000"
            }),
        )
        .unwrap();

    let response = service(&store).claim(&MemberId::new("VG7"), "20").await;
    assert!(response.is_redeemed());

    let member = store.document(&key).unwrap().unwrap();
    assert_eq!(member["puntos"], 20);
    assert_eq!(member["telefono"], "+34 600 000 000");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_coupon_goes_to_exactly_one_member() {
    let store = seeded(20, &[("VG1", 50), ("VG2", 50)], &["VG20-A"]);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["VG1", "VG2"]
        .into_iter()
        .map(|id| {
            let service = service(&store);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.claim(&MemberId::new(id), "20").await
            })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }

    let redeemed = responses.iter().filter(|r| r.is_redeemed()).count();
    let exhausted = responses
        .iter()
        .filter(|r| **r == ClaimResponse::NoCouponAvailable)
        .count();
    assert_eq!((redeemed, exhausted), (1, 1));
    assert_ledger_len(&store, 1);

    let winner = coupon(&store, "VG20-A").usado_por.unwrap();
    let loser = if winner.as_str() == "VG1" { "VG2" } else { "VG1" };
    assert_points(&store, winner.as_str(), 30);
    assert_points(&store, loser, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_member_cannot_spend_twice() {
    let codes: Vec<String> = (0..10).map(|n| format!("VG20-{n}")).collect();
    let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
    let store = seeded(30, &[("VG1", 100)], &codes);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service(&store);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.claim(&MemberId::new("VG1"), "20").await
            })
        })
        .collect();

    let mut redeemed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ClaimResponse::Redeemed { .. } => redeemed += 1,
            ClaimResponse::InsufficientPoints { need, have } => {
                assert_eq!(need, 30);
                assert!(have < 30);
            }
            other => unreachable!("unexpected response {other:?}"),
        }
    }

    assert_eq!(redeemed, 3);
    assert_points(&store, "VG1", 10);

    let entries = ledger(&store);
    assert_eq!(entries.len(), 3);
    let mut balances: Vec<(u64, u64)> = entries
        .iter()
        .map(|e| (e.previous_points, e.new_points))
        .collect();
    balances.sort_unstable();
    assert_eq!(balances, [(40, 10), (70, 40), (100, 70)]);

    let consumed = store
        .documents(Collection::Coupons)
        .unwrap()
        .into_iter()
        .filter(|doc| doc.document["disponible"] == false)
        .count();
    assert_eq!(consumed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_coupon_is_issued_twice() {
    let members: Vec<(String, u64)> = (1..=20).map(|n| (format!("VG{n}"), 100)).collect();
    let members: Vec<(&str, u64)> = members.iter().map(|(id, p)| (id.as_str(), *p)).collect();
    let store = seeded(10, &members, &["A", "B", "C", "D", "E"]);
    let barrier = Arc::new(Barrier::new(members.len()));

    let handles: Vec<_> = members
        .iter()
        .map(|(id, _)| {
            let service = service(&store);
            let barrier = Arc::clone(&barrier);
            let id = MemberId::new(*id);
            tokio::spawn(async move {
                barrier.wait().await;
                service.claim(&id, "20").await
            })
        })
        .collect();

    let mut codes = BTreeSet::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ClaimResponse::Redeemed { code, .. } => assert!(codes.insert(code)),
            ClaimResponse::NoCouponAvailable => exhausted += 1,
            other => unreachable!("unexpected response {other:?}"),
        }
    }

    assert_eq!(codes.len(), 5);
    assert_eq!(exhausted, 15);
    assert_ledger_len(&store, 5);
}

#[tokio::test]
async fn re_executed_bodies_apply_once() {
    let store = seeded(20, &[("VG1", 50)], &["VG20-A", "VG20-B"]);
    store.inject_conflicts(3);

    let response = service(&store).claim(&MemberId::new("VG1"), "20").await;

    assert!(response.is_redeemed());
    assert_eq!(store.transaction_attempts(), 4);
    assert_points(&store, "VG1", 30);
    assert_ledger_len(&store, 1);
    assert_available(&store, "VG20-B", true);
}

#[tokio::test]
async fn exhausted_retries_fail_without_writes() {
    let store = Arc::new(InMemoryDocumentStore::with_policy(
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build(),
    ));
    seed_pricing(&store, &[(DiscountTier::Percent20, 20)]).unwrap();
    seed_member(&store, "VG1", 50).unwrap();
    seed_coupons(&store, DiscountTier::Percent20, &["VG20-A"], test_clock().now()).unwrap();
    store.inject_conflicts(usize::MAX);

    let svc = service(&store);
    let result = svc.redeem(&MemberId::new("VG1"), DiscountTier::Percent20).await;
    assert!(matches!(
        result,
        Err(fidelidad_runtime::LoyaltyError::Store(StoreError::RetriesExhausted { attempts: 3 }))
    ));

    let response = svc.claim(&MemberId::new("VG1"), "20").await;
    assert_eq!(response.error_code(), Some("TRANSACTION_FAILED"));
    assert_points(&store, "VG1", 50);
    assert_available(&store, "VG20-A", true);
    assert_ledger_len(&store, 0);
}

#[tokio::test]
async fn empty_member_id_is_rejected() {
    let store = seeded(20, &[], &["VG20-A"]);
    let result = service(&store)
        .redeem(&MemberId::new("  "), DiscountTier::Percent20)
        .await;
    assert!(matches!(result, Err(fidelidad_runtime::LoyaltyError::InvalidArgument(_))));

    let response = service(&store).claim(&MemberId::new(""), "20").await;
    assert_eq!(response.error_code(), Some("INVALID_ARGUMENT"));
    assert_ledger_len(&store, 0);
}

/// Store whose queries return an already-consumed candidate for the first
/// `stale_queries` calls.
struct StaleQueryStore {
    inner: InMemoryDocumentStore,
    stale_key: DocumentKey,
    stale_queries: AtomicUsize,
}

impl DocumentStore for StaleQueryStore {
    type Tx = InMemoryTransaction;

    fn get(&self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
        self.inner.get(key)
    }

    fn query(&self, query: Query) -> BoxFuture<'_, Result<Vec<StoredDocument>, StoreError>> {
        let stale = self
            .stale_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !stale {
            return self.inner.query(query);
        }
        let key = self.stale_key.clone();
        Box::pin(async move {
            let document = self.inner.get(key.clone()).await?.unwrap_or_default();
            Ok(vec![StoredDocument { key, document }])
        })
    }

    fn run_transaction<'a, T, F>(&'a self, body: F) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> FnMut(&'t mut Self::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send + 'a,
    {
        self.inner.run_transaction(body)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.ping()
    }
}

fn stale_store() -> Arc<StaleQueryStore> {
    let inner = InMemoryDocumentStore::new();
    seed_pricing(&inner, &[(DiscountTier::Percent20, 20)]).unwrap();
    seed_member(&inner, "VG1", 50).unwrap();
    seed_coupons(&inner, DiscountTier::Percent20, &["OLD", "NEW"], test_clock().now()).unwrap();

    let mut used = Coupon::new(DiscountTier::Percent20, "OLD", test_clock().now());
    used.consume(&MemberId::new("VG9"), "vg9@socios.vangogh.test", test_clock().now());
    let stale_key = DocumentKey::new(Collection::Coupons, coupon_id("OLD"));
    inner.insert_as(stale_key.clone(), &used).unwrap();

    Arc::new(StaleQueryStore {
        inner,
        stale_key,
        stale_queries: AtomicUsize::new(1),
    })
}

#[tokio::test]
async fn stale_candidate_fails_by_default() {
    let store = stale_store();
    let response = service(&store).claim(&MemberId::new("VG1"), "20").await;

    assert_eq!(response, ClaimResponse::NoCouponAvailable);
    assert_points(&store.inner, "VG1", 50);
    assert_available(&store.inner, "NEW", true);
}

#[tokio::test]
async fn stale_candidate_can_retry_with_a_fresh_query() {
    let store = stale_store();
    let response = service(&store)
        .with_stale_policy(StaleCandidatePolicy::Retry)
        .claim(&MemberId::new("VG1"), "20")
        .await;

    assert_eq!(
        response,
        ClaimResponse::Redeemed {
            code: "NEW".into(),
            new_points: 30,
            cost: 20
        }
    );
    assert_eq!(store.inner.transaction_attempts(), 2);
}

#[tokio::test]
async fn redemption_notifies_after_commit() {
    fidelidad_testing::init_tracing();
    let store = seeded(20, &[("VG1", 50)], &["VG20-A"]);
    let notifier = Arc::new(RecordingNotifier::new());
    let svc = LoyaltyService::new(Arc::clone(&store))
        .with_clock(Arc::new(test_clock()))
        .with_notifier(notifier.clone());

    let outcome = svc
        .redeem(&MemberId::new("VG1"), DiscountTier::Percent20)
        .await
        .unwrap();
    assert!(matches!(outcome, RedeemOutcome::Redeemed { .. }));

    let notices = notifier.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(
        notices,
        [Notice::CouponRedeemed {
            member_id: MemberId::new("VG1"),
            email: email_for("VG1"),
            tier: DiscountTier::Percent20,
            code: "VG20-A".into(),
            cost: 20,
            new_points: 30,
        }]
    );
}

#[tokio::test]
async fn failed_redemptions_notify_nobody() {
    let store = seeded(20, &[("VG1", 10)], &["VG20-A"]);
    let notifier = Arc::new(RecordingNotifier::new());
    let svc = LoyaltyService::new(Arc::clone(&store)).with_notifier(notifier.clone());

    let response = svc.claim(&MemberId::new("VG1"), "20").await;
    assert!(!response.is_redeemed());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn notifier_failures_do_not_undo_the_redemption() {
    let store = seeded(20, &[("VG1", 50)], &["VG20-A"]);
    let notifier = Arc::new(FailingNotifier::new());
    let svc = LoyaltyService::new(Arc::clone(&store)).with_notifier(notifier.clone());

    let response = svc.claim(&MemberId::new("VG1"), "20").await;
    assert!(response.is_redeemed());

    for _ in 0..100 {
        if notifier.attempts() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(notifier.attempts(), 1);
    assert_points(&store, "VG1", 30);
}
