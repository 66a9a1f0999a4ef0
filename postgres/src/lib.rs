//! `PostgreSQL` document store for Fidelidad.
//!
//! Implements the [`DocumentStore`] contract from `fidelidad-core` on a
//! single `documents` table (`collection`, `id`, `body JSONB`, `version`):
//!
//! - Each transaction attempt is a `REPEATABLE READ` database transaction,
//!   so reads see one snapshot
//! - Writes are buffered and applied at commit with version predicates;
//!   a predicate that matches no row is a conflict
//! - Keys that were read but not written are re-checked `FOR SHARE`
//! - Claim queries run on the transaction's connection with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent claims spread over the
//!   available rows instead of racing for the first one
//! - Serialization failures (`40001`) and deadlocks (`40P01`) are conflicts
//!
//! Conflicting attempts are rolled back and re-run by
//! [`run_optimistic`](fidelidad_runtime::retry::run_optimistic).
//!
//! # Example
//!
//! ```ignore
//! use fidelidad_postgres::{PoolSettings, PostgresDocumentStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresDocumentStore::connect("postgres://localhost/fidelidad", &PoolSettings::default()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use fidelidad_core::error::StoreError;
use fidelidad_core::store::{
    Collection, Document, DocumentKey, DocumentStore, Query, StoredDocument, Transaction,
};
use fidelidad_runtime::retry::{RetryPolicy, run_optimistic};
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row};
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL`-backed [`DocumentStore`].
#[derive(Clone, Debug)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    policy: RetryPolicy,
}

impl PostgresDocumentStore {
    /// Connect with the given pool settings and the default transaction
    /// retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::for_transactions(),
        }
    }

    /// Replace the transaction retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create the `documents` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(PgTransaction {
            tx,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        })
    }

    async fn commit(&self, handle: PgTransaction) -> Result<(), StoreError> {
        let PgTransaction {
            mut tx,
            reads,
            writes,
        } = handle;

        for (key, seen) in &reads {
            if writes.contains_key(key) {
                continue;
            }
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR SHARE",
            )
            .bind(key.collection.as_str())
            .bind(&key.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if current != *seen {
                return Err(StoreError::conflict(key.to_string()));
            }
        }

        for (key, body) in &writes {
            let affected = match reads.get(key) {
                Some(Some(version)) => sqlx::query(
                    r"
                    UPDATE documents
                    SET body = $3, version = version + 1, updated_at = now()
                    WHERE collection = $1 AND id = $2 AND version = $4
                    ",
                )
                .bind(key.collection.as_str())
                .bind(&key.id)
                .bind(body)
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected(),
                Some(None) => sqlx::query(
                    r"
                    INSERT INTO documents (collection, id, body)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (collection, id) DO NOTHING
                    ",
                )
                .bind(key.collection.as_str())
                .bind(&key.id)
                .bind(body)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected(),
                None => sqlx::query(
                    r"
                    INSERT INTO documents (collection, id, body)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (collection, id) DO UPDATE
                    SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()
                    ",
                )
                .bind(key.collection.as_str())
                .bind(&key.id)
                .bind(body)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected(),
            };

            if affected == 0 {
                return Err(StoreError::conflict(key.to_string()));
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        tracing::trace!(reads = reads.len(), writes = writes.len(), "Document transaction committed");
        Ok(())
    }
}

/// Transaction handle of [`PostgresDocumentStore`].
///
/// Dropping it without committing rolls the database transaction back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    reads: BTreeMap<DocumentKey, Option<i64>>,
    writes: BTreeMap<DocumentKey, Document>,
}

impl Transaction for PgTransaction {
    fn get(&mut self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
        Box::pin(async move {
            if let Some(buffered) = self.writes.get(&key) {
                return Ok(Some(buffered.clone()));
            }

            let row = sqlx::query(
                "SELECT body, version FROM documents WHERE collection = $1 AND id = $2",
            )
            .bind(key.collection.as_str())
            .bind(&key.id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

            let (document, version) = match row {
                Some(row) => {
                    let body: Document = row.try_get("body").map_err(map_sqlx_error)?;
                    let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
                    (Some(body), Some(version))
                }
                None => (None, None),
            };
            self.reads.entry(key).or_insert(version);
            Ok(document)
        })
    }

    fn set(&mut self, key: DocumentKey, document: Document) {
        self.writes.insert(key, document);
    }
}

impl DocumentStore for PostgresDocumentStore {
    type Tx = PgTransaction;

    fn get(&self, key: DocumentKey) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
        Box::pin(async move {
            let body: Option<Document> = sqlx::query_scalar(
                "SELECT body FROM documents WHERE collection = $1 AND id = $2",
            )
            .bind(key.collection.as_str())
            .bind(&key.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(body)
        })
    }

    fn query(&self, query: Query) -> BoxFuture<'_, Result<Vec<StoredDocument>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, body FROM documents
                WHERE collection = $1 AND body @> $2
                ORDER BY id
                LIMIT $3
                ",
            )
            .bind(query.collection.as_str())
            .bind(query.filter_object())
            .bind(sql_limit(&query))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            decode_rows(query.collection, rows)
        })
    }

    fn run_transaction<'a, T, F>(&'a self, body: F) -> BoxFuture<'a, Result<T, StoreError>>
    where
        T: Send + 'a,
        F: for<'t> FnMut(&'t mut Self::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send + 'a,
    {
        Box::pin(run_optimistic(
            &self.policy,
            move || self.begin(),
            body,
            move |tx| self.commit(tx),
        ))
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn claim_query<'t>(
        &'t self,
        tx: &'t mut PgTransaction,
        query: Query,
    ) -> BoxFuture<'t, Result<Vec<StoredDocument>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, body FROM documents
                WHERE collection = $1 AND body @> $2
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
                ",
            )
            .bind(query.collection.as_str())
            .bind(query.filter_object())
            .bind(sql_limit(&query))
            .fetch_all(&mut *tx.tx)
            .await
            .map_err(map_sqlx_error)?;

            if rows.is_empty() {
                let held: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM documents WHERE collection = $1 AND body @> $2)",
                )
                .bind(query.collection.as_str())
                .bind(query.filter_object())
                .fetch_one(&mut *tx.tx)
                .await
                .map_err(map_sqlx_error)?;

                if held {
                    metrics::counter!("fidelidad_postgres_claim_contention_total").increment(1);
                    return Err(StoreError::conflict(format!(
                        "every {} candidate is held by another transaction",
                        query.collection
                    )));
                }
            }

            decode_rows(query.collection, rows)
        })
    }
}

fn sql_limit(query: &Query) -> Option<i64> {
    query
        .limit
        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
}

fn decode_rows(
    collection: Collection,
    rows: Vec<sqlx::postgres::PgRow>,
) -> Result<Vec<StoredDocument>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let id: String = row.try_get("id").map_err(map_sqlx_error)?;
            let document: Document = row.try_get("body").map_err(map_sqlx_error)?;
            Ok(StoredDocument {
                key: DocumentKey::new(collection, id),
                document,
            })
        })
        .collect()
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        // Serialization failure or deadlock.
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001" | "40P01")) => {
            metrics::counter!("fidelidad_postgres_serialization_failures_total").increment(1);
            StoreError::conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}
