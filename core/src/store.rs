//! Document store contract.
//!
//! The loyalty domain persists JSON documents addressed by
//! `(collection, id)`. Stores expose three things:
//!
//! - point reads ([`DocumentStore::get`])
//! - point-in-time equality queries ([`DocumentStore::query`]), never transactional
//! - optimistic transactions ([`DocumentStore::run_transaction`])
//!
//! # Transactions
//!
//! A transaction body receives a [`Transaction`] handle. Reads through the
//! handle see a snapshot taken when the attempt began; writes are buffered and
//! only become visible when the store commits. The commit succeeds iff no key
//! the body read was written by someone else since the snapshot. Otherwise the
//! store discards the buffered writes and runs the body again, up to its
//! configured limit, then fails with [`StoreError::RetriesExhausted`].
//!
//! Because a body may run several times, it must not perform side effects
//! beyond reads and buffered writes. A body may also return
//! [`StoreError::Conflict`] itself to ask for a fresh attempt.
//!
//! # Implementations
//!
//! - `InMemoryDocumentStore` (in `fidelidad-testing`): copy-on-write snapshots
//! - `PostgresDocumentStore` (in `fidelidad-postgres`): versioned JSONB rows
//!
//! # Example
//!
//! ```no_run
//! use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Transaction};
//! use fidelidad_core::error::StoreError;
//! use serde_json::json;
//!
//! async fn bump<S: DocumentStore>(store: &S) -> Result<u64, StoreError> {
//!     store
//!         .run_transaction(|tx| {
//!             Box::pin(async move {
//!                 let key = DocumentKey::new(Collection::Counters, "visits");
//!                 let last = tx
//!                     .get(key.clone())
//!                     .await?
//!                     .and_then(|doc| doc.get("last").and_then(serde_json::Value::as_u64))
//!                     .unwrap_or(0);
//!                 tx.set(key, json!({ "last": last + 1 }));
//!                 Ok(last + 1)
//!             })
//!         })
//!         .await
//! }
//! ```

use crate::error::StoreError;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A stored JSON document.
pub type Document = Value;

/// The collections the loyalty domain reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Member profiles and balances.
    Members,
    /// Pre-generated single-use coupon codes.
    Coupons,
    /// Immutable balance movements.
    Ledger,
    /// The tier pricing singleton.
    Pricing,
    /// Sequence counters (member numbers).
    Counters,
    /// Unique email index pointing at member ids.
    MemberEmails,
    /// Unique coupon code index pointing at coupon ids.
    CouponCodes,
}

impl Collection {
    /// Every collection.
    pub const ALL: [Self; 7] = [
        Self::Members,
        Self::Coupons,
        Self::Ledger,
        Self::Pricing,
        Self::Counters,
        Self::MemberEmails,
        Self::CouponCodes,
    ];

    /// Collection name as persisted.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Coupons => "coupons",
            Self::Ledger => "ledger",
            Self::Pricing => "pricing",
            Self::Counters => "counters",
            Self::MemberEmails => "member_emails",
            Self::CouponCodes => "coupon_codes",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Owning collection.
    pub collection: Collection,
    /// Id within the collection.
    pub id: String,
}

impl DocumentKey {
    /// Address an existing or well-known document.
    #[must_use]
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }

    /// Allocate a fresh key with a random UUID v4 id.
    #[must_use]
    pub fn generated(collection: Collection) -> Self {
        Self::new(collection, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document together with its address, as returned by queries.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    /// Where the document lives.
    pub key: DocumentKey,
    /// Document body.
    pub document: Document,
}

impl StoredDocument {
    /// Decode the body into a typed model.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(T::deserialize(&self.document)?)
    }
}

/// Equality query over one collection.
///
/// [`DocumentStore::query`] orders results by document id, so every adapter
/// returns the same candidate for the same data.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Collection to scan.
    pub collection: Collection,
    /// Top-level `field == value` conjuncts.
    pub filters: Vec<(String, Value)>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Match every document in `collection`.
    #[must_use]
    pub const fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            limit: None,
        }
    }

    /// Require `field` to equal `value`.
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `document` satisfies every filter.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }

    /// The filters as one JSON object, for containment (`@>`) queries.
    #[must_use]
    pub fn filter_object(&self) -> Value {
        let map: Map<String, Value> = self.filters.iter().cloned().collect();
        Value::Object(map)
    }
}

/// Handle passed to a transaction body.
///
/// Reads are snapshot-consistent; writes are buffered until commit.
pub trait Transaction: Send {
    /// Read a document as of the transaction snapshot.
    ///
    /// The key joins the transaction's read set whether or not the document
    /// exists, so a concurrent creation also conflicts.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend read fails.
    fn get(&mut self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>>;

    /// Buffer a full-document write. Later writes to the same key replace
    /// earlier ones.
    fn set(&mut self, key: DocumentKey, document: Document);
}

/// Typed helpers over [`Transaction`].
pub trait TransactionExt: Transaction {
    /// Read and decode a document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the document does not decode,
    /// or the backend error from the read.
    fn get_as<T>(&mut self, key: DocumentKey) -> BoxFuture<'_, Result<Option<T>, StoreError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Box::pin(async move {
            match self.get(key).await? {
                Some(document) => Ok(Some(serde_json::from_value(document)?)),
                None => Ok(None),
            }
        })
    }

    /// Encode and buffer a document write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if `value` cannot be encoded.
    fn set_as<T: Serialize>(&mut self, key: DocumentKey, value: &T) -> Result<(), StoreError> {
        let document = serde_json::to_value(value)?;
        self.set(key, document);
        Ok(())
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

/// A document store with optimistic transactions.
///
/// Methods return boxed futures so adapters can be shared behind `Arc`
/// across request handlers and spawned tasks.
pub trait DocumentStore: Send + Sync + 'static {
    /// Transaction handle type handed to bodies.
    type Tx: Transaction;

    /// Read the latest committed version of a document.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend read fails.
    fn get(&self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>>;

    /// Run an equality query against committed data.
    ///
    /// Not part of any transaction: results may already be stale when a
    /// transaction re-reads them.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend query fails.
    fn query(&self, query: Query) -> BoxFuture<'_, Result<Vec<StoredDocument>, StoreError>>;

    /// Run `body` in an optimistic transaction, re-executing it on conflict.
    ///
    /// The body's value is returned after a successful commit. If the body
    /// returns an error other than [`StoreError::Conflict`], its writes are
    /// discarded and the error is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RetriesExhausted`] when every attempt conflicted
    /// - any non-conflict error returned by the body or the backend
    fn run_transaction<'a, T, F>(&'a self, body: F) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> FnMut(&'t mut Self::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send + 'a;

    /// Check that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if it is not.
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Query for documents the transaction `tx` is about to claim.
    ///
    /// Same filter semantics as [`DocumentStore::query`], and the results do
    /// not join the read set: re-read a candidate through `tx` to make the
    /// commit check it. The default runs [`DocumentStore::query`].
    ///
    /// Backends that hold a connection per transaction run the query on it,
    /// and may skip documents that concurrent transactions are claiming.
    /// Such backends return [`StoreError::Conflict`] when every match is
    /// held elsewhere, so the attempt re-runs once those transactions end.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend query fails.
    fn claim_query<'t>(
        &'t self,
        _tx: &'t mut Self::Tx,
        query: Query,
    ) -> BoxFuture<'t, Result<Vec<StoredDocument>, StoreError>> {
        self.query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_display_is_collection_slash_id() {
        let key = DocumentKey::new(Collection::MemberEmails, "ana@example.com");
        assert_eq!(key.to_string(), "member_emails/ana@example.com");
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = DocumentKey::generated(Collection::Ledger);
        let b = DocumentKey::generated(Collection::Ledger);
        assert_ne!(a, b);
        assert_eq!(a.collection, Collection::Ledger);
    }

    #[test]
    fn query_matches_all_filters() {
        let query = Query::new(Collection::Coupons)
            .where_eq("descuento", "20")
            .where_eq("disponible", true)
            .limit(1);

        assert!(query.matches(&json!({"descuento": "20", "disponible": true, "codigo": "X"})));
        assert!(!query.matches(&json!({"descuento": "20", "disponible": false})));
        assert!(!query.matches(&json!({"descuento": "10", "disponible": true})));
        assert!(!query.matches(&json!({"disponible": true})));
        assert_eq!(query.limit, Some(1));
    }

    #[test]
    fn filter_object_collects_conjuncts() {
        let query = Query::new(Collection::Ledger).where_eq("memberId", "VG7");
        assert_eq!(query.filter_object(), json!({"memberId": "VG7"}));
        assert_eq!(Query::new(Collection::Pricing).filter_object(), json!({}));
    }

    #[test]
    fn collection_names_are_stable() {
        let names: Vec<_> = Collection::ALL.iter().map(Collection::as_str).collect();
        assert_eq!(
            names,
            [
                "members",
                "coupons",
                "ledger",
                "pricing",
                "counters",
                "member_emails",
                "coupon_codes"
            ]
        );
    }
}
