//! In-memory document store.
//!
//! Optimistic concurrency over a copy-on-write map:
//!
//! - `begin` clones the `Arc` of the committed map (the snapshot)
//! - reads go to the snapshot and record the version they saw
//! - writes are buffered in the transaction
//! - commit takes the write lock, checks every recorded version against the
//!   committed map, then applies the writes with bumped versions
//!
//! A transaction that wrote nothing commits without validation.

use fidelidad_core::error::StoreError;
use fidelidad_core::store::{
    Collection, Document, DocumentKey, DocumentStore, Query, StoredDocument, Transaction,
};
use fidelidad_runtime::retry::{RetryPolicy, run_optimistic};
use futures::future::{self, BoxFuture};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Clone, Debug)]
struct Versioned {
    document: Document,
    version: u64,
}

type Documents = BTreeMap<DocumentKey, Versioned>;

/// In-memory [`DocumentStore`] with snapshot reads and commit-time validation.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    committed: RwLock<Arc<Documents>>,
    policy: RetryPolicy,
    injected_conflicts: AtomicUsize,
    attempts: AtomicUsize,
    commits: AtomicUsize,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Empty store with a retry policy generous enough for contention tests.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(
            RetryPolicy::builder()
                .max_retries(100)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .jitter(true)
                .build(),
        )
    }

    /// Empty store with a custom retry policy.
    #[must_use]
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            committed: RwLock::new(Arc::new(BTreeMap::new())),
            policy,
            injected_conflicts: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` commits fail with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of transaction attempts started so far.
    #[must_use]
    pub fn transaction_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Write a document outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock is poisoned.
    pub fn insert(&self, key: DocumentKey, document: Document) -> Result<(), StoreError> {
        let mut committed = self.write_lock()?;
        let documents = Arc::make_mut(&mut committed);
        let version = documents.get(&key).map_or(0, |v| v.version) + 1;
        documents.insert(key, Versioned { document, version });
        Ok(())
    }

    /// Encode and write a document outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if `value` cannot be encoded, or
    /// [`StoreError::Unavailable`] if the lock is poisoned.
    pub fn insert_as<T: Serialize>(&self, key: DocumentKey, value: &T) -> Result<(), StoreError> {
        self.insert(key, serde_json::to_value(value)?)
    }

    /// Committed version of a document, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock is poisoned.
    pub fn version(&self, key: &DocumentKey) -> Result<Option<u64>, StoreError> {
        Ok(self.snapshot()?.get(key).map(|v| v.version))
    }

    /// Committed document at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock is poisoned.
    pub fn document(&self, key: &DocumentKey) -> Result<Option<Document>, StoreError> {
        Ok(self.snapshot()?.get(key).map(|v| v.document.clone()))
    }

    /// Every committed document of `collection`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the lock is poisoned.
    pub fn documents(&self, collection: Collection) -> Result<Vec<StoredDocument>, StoreError> {
        self.scan(&Query::new(collection))
    }

    fn snapshot(&self) -> Result<Arc<Documents>, StoreError> {
        self.committed
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Arc<Documents>>, StoreError> {
        self.committed
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn scan(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let snapshot = self.snapshot()?;
        let matches = snapshot
            .iter()
            .filter(|(key, versioned)| key.collection == query.collection && query.matches(&versioned.document))
            .map(|(key, versioned)| StoredDocument {
                key: key.clone(),
                document: versioned.document.clone(),
            });

        Ok(match query.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryTransaction {
            snapshot: self.snapshot()?,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        })
    }

    fn commit(&self, tx: InMemoryTransaction) -> Result<(), StoreError> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::conflict("injected conflict"));
        }

        if tx.writes.is_empty() {
            self.commits.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut committed = self.write_lock()?;
        for (key, seen) in &tx.reads {
            let current = committed.get(key).map(|v| v.version);
            if current != *seen {
                return Err(StoreError::conflict(key.to_string()));
            }
        }

        let documents = Arc::make_mut(&mut committed);
        for (key, document) in tx.writes {
            let version = documents.get(&key).map_or(0, |v| v.version) + 1;
            documents.insert(key, Versioned { document, version });
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transaction handle of [`InMemoryDocumentStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    snapshot: Arc<Documents>,
    reads: BTreeMap<DocumentKey, Option<u64>>,
    writes: BTreeMap<DocumentKey, Document>,
}

impl InMemoryTransaction {
    /// Keys written so far, in key order.
    #[must_use]
    pub fn pending_writes(&self) -> Vec<&DocumentKey> {
        self.writes.keys().collect()
    }
}

impl Transaction for InMemoryTransaction {
    fn get(&mut self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
        let seen = self.snapshot.get(&key);
        self.reads
            .entry(key.clone())
            .or_insert_with(|| seen.map(|v| v.version));

        let document = match self.writes.get(&key) {
            Some(buffered) => Some(buffered.clone()),
            None => seen.map(|v| v.document.clone()),
        };
        Box::pin(future::ready(Ok(document)))
    }

    fn set(&mut self, key: DocumentKey, document: Document) {
        self.writes.insert(key, document);
    }
}

impl DocumentStore for InMemoryDocumentStore {
    type Tx = InMemoryTransaction;

    fn get(&self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
        let result = self
            .snapshot()
            .map(|snapshot| snapshot.get(&key).map(|v| v.document.clone()));
        Box::pin(future::ready(result))
    }

    fn query(&self, query: Query) -> BoxFuture<'_, Result<Vec<StoredDocument>, StoreError>> {
        Box::pin(future::ready(self.scan(&query)))
    }

    fn run_transaction<'a, T, F>(&'a self, body: F) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> FnMut(&'t mut Self::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send + 'a,
    {
        Box::pin(run_optimistic(
            &self.policy,
            move || future::ready(self.begin()),
            body,
            move |tx| future::ready(self.commit(tx)),
        ))
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(future::ready(self.snapshot().map(|_| ())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new(Collection::Counters, id)
    }

    async fn increment(store: &InMemoryDocumentStore, id: &'static str) -> Result<u64, StoreError> {
        store
            .run_transaction(move |tx| {
                Box::pin(async move {
                    let current = tx
                        .get(key(id))
                        .await?
                        .and_then(|doc| doc.get("last").and_then(serde_json::Value::as_u64))
                        .unwrap_or(0);
                    tx.set(key(id), json!({ "last": current + 1 }));
                    Ok(current + 1)
                })
            })
            .await
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryDocumentStore::new();
        assert_eq!(increment(&store, "a").await, Ok(1));
        assert_eq!(increment(&store, "a").await, Ok(2));
        assert_eq!(store.get(key("a")).await.unwrap(), Some(json!({"last": 2})));
        assert_eq!(store.version(&key("a")).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn failed_body_discards_writes() {
        let store = InMemoryDocumentStore::new();
        let result: Result<(), StoreError> = store
            .run_transaction(|tx| {
                Box::pin(async move {
                    tx.set(key("b"), json!({"last": 9}));
                    Err(StoreError::Database("boom".into()))
                })
            })
            .await;

        assert_eq!(result, Err(StoreError::Database("boom".into())));
        assert_eq!(store.get(key("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conflicting_commit_reruns_body() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let raced = Arc::new(AtomicUsize::new(0));

        let outer_store = Arc::clone(&store);
        let result = store
            .run_transaction(move |tx| {
                let store = Arc::clone(&outer_store);
                let raced = Arc::clone(&raced);
                Box::pin(async move {
                    let current = tx
                        .get(key("c"))
                        .await?
                        .and_then(|doc| doc.get("last").and_then(serde_json::Value::as_u64))
                        .unwrap_or(0);
                    // A concurrent writer commits between our read and our commit.
                    if raced.fetch_add(1, Ordering::SeqCst) == 0 {
                        store.insert(key("c"), json!({"last": 10}))?;
                    }
                    tx.set(key("c"), json!({ "last": current + 1 }));
                    Ok(current + 1)
                })
            })
            .await;

        assert_eq!(result, Ok(11));
        assert_eq!(store.transaction_attempts(), 2);
    }

    #[tokio::test]
    async fn creation_of_a_read_absent_key_conflicts() {
        let store = InMemoryDocumentStore::new();
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.get(key("d")).await.unwrap(), None);
        tx.set(key("e"), json!({}));

        store.insert(key("d"), json!({"last": 1})).unwrap();
        assert!(store.commit(tx).unwrap_err().is_conflict());
    }

    #[test]
    fn read_only_transactions_skip_validation() {
        let store = InMemoryDocumentStore::new();
        let mut tx = store.begin().unwrap();
        let _ = tokio_test::block_on(tx.get(key("f"))).unwrap();
        store.insert(key("f"), json!({"last": 1})).unwrap();
        assert_eq!(store.commit(tx), Ok(()));
        assert_eq!(store.commits(), 1);
    }

    #[test]
    fn buffered_writes_are_read_back() {
        let store = InMemoryDocumentStore::new();
        let mut tx = store.begin().unwrap();
        tx.set(key("h"), json!({"last": 3}));
        let read = tokio_test::block_on(tx.get(key("h"))).unwrap();
        assert_eq!(read, Some(json!({"last": 3})));
        assert_eq!(tx.pending_writes(), vec![&key("h")]);
        tokio_test::assert_ok!(tokio_test::block_on(store.ping()));
    }

    #[tokio::test]
    async fn exhausted_retries_surface() {
        let store = InMemoryDocumentStore::with_policy(
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        store.inject_conflicts(10);

        assert_eq!(
            increment(&store, "g").await,
            Err(StoreError::RetriesExhausted { attempts: 3 })
        );
        assert_eq!(store.get(key("g")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = InMemoryDocumentStore::new();
        for (id, tier, available) in [("c3", "10", true), ("c1", "10", true), ("c2", "10", false), ("c0", "20", true)] {
            store
                .insert(
                    DocumentKey::new(Collection::Coupons, id),
                    json!({"descuento": tier, "disponible": available}),
                )
                .unwrap();
        }

        let query = Query::new(Collection::Coupons)
            .where_eq("descuento", "10")
            .where_eq("disponible", true);
        let ids: Vec<String> = store
            .query(query.clone())
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc.key.id)
            .collect();
        assert_eq!(ids, ["c1", "c3"]);

        let first = store.query(query.limit(1)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key.id, "c1");
    }
}
