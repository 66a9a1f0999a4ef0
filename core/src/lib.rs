//! # Fidelidad Core
//!
//! Domain types and the document store contract for the Club Van Gogh
//! loyalty platform.
//!
//! Members accrue points and redeem them for single-use discount coupons.
//! Everything that must happen atomically (debit the member, consume the
//! coupon, append a ledger movement) happens inside one optimistic store
//! transaction.
//!
//! ## Modules
//!
//! - [`tier`]: discount tiers and input normalization
//! - [`model`]: persisted documents (member, coupon, pricing, ledger)
//! - [`store`]: the `DocumentStore` / `Transaction` contract
//! - [`error`]: store errors
//! - [`environment`]: injected dependencies (clock)
//!
//! Adapters live in sibling crates: `fidelidad-testing` (in-memory) and
//! `fidelidad-postgres`.

pub mod error;
pub mod model;
pub mod store;
pub mod tier;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::StoreError;
pub use model::{
    Counter, Coupon, CouponCodeIndex, LedgerEntry, Member, MemberEmailIndex, MemberId,
    MovementKind, PricingConfig,
};
pub use store::{
    Collection, Document, DocumentKey, DocumentStore, Query, StoredDocument, Transaction,
    TransactionExt,
};
pub use tier::{DiscountTier, ParseTierError};

/// Environment module - Dependency injection traits
///
/// Time is the only ambient dependency of the domain; it is injected so
/// tests can pin every timestamp written to documents.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use fidelidad_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
