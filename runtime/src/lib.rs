//! # Fidelidad Runtime
//!
//! Loyalty operations on top of the [`DocumentStore`] contract.
//!
//! The heart of the crate is the redemption transaction
//! ([`redemption::redeem`]): check the balance, allocate a coupon, debit the
//! member, consume the coupon and append a ledger movement, all in one
//! optimistic store transaction. Everything else (adjustments, registration,
//! coupon stock, pricing) follows the same shape: a side-effect free body run
//! by the store, followed by logging, metrics and a post-commit notification
//! in [`service::LoyaltyService`].
//!
//! ## Example
//!
//! ```no_run
//! use fidelidad_runtime::service::LoyaltyService;
//! use fidelidad_core::{DocumentStore, MemberId};
//! use std::sync::Arc;
//!
//! async fn redeem<S: DocumentStore>(store: Arc<S>) {
//!     let service = LoyaltyService::new(store);
//!     let response = service.claim(&MemberId::new("VG1"), "20%").await;
//!     println!("{}", serde_json::to_string(&response).unwrap_or_default());
//! }
//! ```
//!
//! [`DocumentStore`]: fidelidad_core::store::DocumentStore

pub mod adjustment;
pub mod allocator;
pub mod command;
pub mod coupons;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod outcome;
pub mod pricing;
pub mod redemption;
pub mod registration;
pub mod retry;
pub mod service;
pub mod views;

pub use allocator::StaleCandidatePolicy;
pub use command::{Caller, CommandResult, LoyaltyCommand, Role};
pub use error::LoyaltyError;
pub use outcome::{ClaimResponse, RedeemOutcome};
pub use retry::RetryPolicy;
pub use service::LoyaltyService;
