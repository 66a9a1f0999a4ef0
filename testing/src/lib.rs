//! # Fidelidad Testing
//!
//! Test doubles and helpers for the loyalty crates.
//!
//! This crate provides:
//! - [`InMemoryDocumentStore`], a full optimistic-concurrency store
//! - Mock implementations of the clock and notification sink
//! - Fixtures that seed members, coupons and pricing
//! - [`RedemptionScenario`], a Given-When-Then harness for redemptions
//! - Proptest strategies for tier input and balances
//!
//! ## Example
//!
//! ```ignore
//! use fidelidad_testing::{RedemptionScenario, test_clock};
//! use fidelidad_core::DiscountTier;
//!
//! #[tokio::test]
//! async fn redeem_twenty_percent() {
//!     RedemptionScenario::new()
//!         .given_cost(DiscountTier::Percent20, 100)
//!         .given_member("VG1", 150)
//!         .given_coupons(DiscountTier::Percent20, &["VG20-A"])
//!         .when_claiming("VG1", "20%")
//!         .then_response(|response| assert!(response.is_redeemed()))
//!         .run()
//!         .await;
//! }
//! ```

pub mod memory;
pub mod scenario;

pub use memory::{InMemoryDocumentStore, InMemoryTransaction};
pub use mocks::{FailingNotifier, FixedClock, RecordingNotifier, test_clock};
pub use scenario::RedemptionScenario;

/// Route `tracing` output to the test harness, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use fidelidad_core::environment::Clock;
    use fidelidad_runtime::notify::{Notice, NotifyError, Notifier};
    use futures::future::{self, BoxFuture};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use fidelidad_testing::mocks::FixedClock;
    /// use fidelidad_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Notifier that keeps every notice it receives.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        /// Empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Notices received so far.
        #[must_use]
        pub fn notices(&self) -> Vec<Notice> {
            self.notices
                .lock()
                .map(|notices| notices.clone())
                .unwrap_or_default()
        }

        /// Wait until at least `count` notices arrived or `timeout` elapsed,
        /// then return what arrived.
        ///
        /// Notices are delivered on detached tasks, so tests poll.
        pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notice> {
            let deadline = Instant::now() + timeout;
            loop {
                let notices = self.notices();
                if notices.len() >= count || Instant::now() >= deadline {
                    return notices;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) -> BoxFuture<'_, Result<(), NotifyError>> {
            if let Ok(mut notices) = self.notices.lock() {
                notices.push(notice);
            }
            Box::pin(future::ready(Ok(())))
        }
    }

    /// Notifier whose deliveries always fail.
    #[derive(Debug, Default)]
    pub struct FailingNotifier {
        attempts: AtomicUsize,
    }

    impl FailingNotifier {
        /// New failing notifier.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Deliveries attempted so far.
        #[must_use]
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Notifier for FailingNotifier {
        fn notify(&self, _notice: Notice) -> BoxFuture<'_, Result<(), NotifyError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(future::ready(Err(NotifyError::Transport(
                "connection refused".into(),
            ))))
        }
    }
}

/// Seed data for stores.
///
/// Fixtures write straight to the committed state of an
/// [`InMemoryDocumentStore`], bypassing transactions.
pub mod fixtures {
    use super::InMemoryDocumentStore;
    use fidelidad_core::error::StoreError;
    use fidelidad_core::model::{Coupon, CouponCodeIndex, Member, MemberEmailIndex, MemberId, PricingConfig};
    use fidelidad_core::store::{Collection, DocumentKey};
    use fidelidad_core::tier::DiscountTier;
    use chrono::{DateTime, Utc};
    use serde_json::Map;

    /// Email used by [`seed_member`] for `id`.
    #[must_use]
    pub fn email_for(id: &str) -> String {
        format!("{}@socios.vangogh.test", id.to_lowercase())
    }

    /// Id given by [`seed_coupons`] to the coupon with `code`.
    #[must_use]
    pub fn coupon_id(code: &str) -> String {
        format!("cupon-{code}")
    }

    /// Write a member with `puntos` points and its email index entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a write fails.
    pub fn seed_member(store: &InMemoryDocumentStore, id: &str, puntos: u64) -> Result<Member, StoreError> {
        let member_id = MemberId::new(id);
        let numero = id
            .strip_prefix(MemberId::PREFIX)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let member = Member {
            numero,
            nombre: "Vincent".into(),
            apellido: "Socio".into(),
            email: email_for(id),
            puntos,
            password_hash: String::new(),
            fecha_registro: None,
            ultima_actualizacion: None,
            ultimo_motivo: None,
            extra: Map::new(),
        };

        store.insert_as(DocumentKey::new(Collection::Members, member_id.as_str()), &member)?;
        store.insert_as(
            DocumentKey::new(Collection::MemberEmails, member.email.clone()),
            &MemberEmailIndex { member_id },
        )?;
        Ok(member)
    }

    /// Write one available coupon per code, with the code index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a write fails.
    pub fn seed_coupons(
        store: &InMemoryDocumentStore,
        tier: DiscountTier,
        codes: &[&str],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for code in codes {
            let id = coupon_id(code);
            store.insert_as(
                DocumentKey::new(Collection::Coupons, id.clone()),
                &Coupon::new(tier, *code, at),
            )?;
            store.insert_as(
                DocumentKey::new(Collection::CouponCodes, *code),
                &CouponCodeIndex {
                    coupon_id: id,
                    descuento: tier,
                },
            )?;
        }
        Ok(())
    }

    /// Write the pricing document with the given costs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub fn seed_pricing(
        store: &InMemoryDocumentStore,
        costs: &[(DiscountTier, u64)],
    ) -> Result<PricingConfig, StoreError> {
        let pricing = PricingConfig {
            updated_at: None,
            updated_by: Some("seed".into()),
            costs: costs
                .iter()
                .map(|(tier, cost)| (tier.as_str().to_string(), *cost))
                .collect(),
        };
        store.insert_as(
            DocumentKey::new(Collection::Pricing, PricingConfig::DOCUMENT_ID),
            &pricing,
        )?;
        Ok(pricing)
    }
}

/// Proptest strategies.
pub mod properties {
    use fidelidad_core::tier::DiscountTier;
    use proptest::prelude::*;

    /// Any tier.
    pub fn any_tier() -> impl Strategy<Value = DiscountTier> {
        prop::sample::select(DiscountTier::ALL.to_vec())
    }

    /// Spellings of `tier` a member might type.
    pub fn tier_spelling(tier: DiscountTier) -> impl Strategy<Value = String> {
        let spellings: Vec<String> = match tier {
            DiscountTier::FreeShipping => vec![
                "envio_gratis".into(),
                "Envío gratis".into(),
                "ENVIO-GRATIS".into(),
                "  envio   gratis ".into(),
                "free shipping".into(),
            ],
            other => {
                let n = other.as_str();
                vec![n.into(), format!("{n}%"), format!(" {n} % "), format!("{n}%  ")]
            }
        };
        prop::sample::select(spellings)
    }

    /// Balance and cost pairs, including the exact-balance edge.
    pub fn balance_and_cost() -> impl Strategy<Value = (u64, u64)> {
        prop_oneof![
            (0u64..10_000, 0u64..10_000),
            (0u64..10_000).prop_map(|n| (n, n)),
        ]
    }
}
