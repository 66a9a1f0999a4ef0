//! Errors surfaced by document store adapters.

use thiserror::Error;

/// Errors that can occur while talking to the document store.
///
/// Business outcomes (insufficient points, no stock, ...) are never expressed
/// as `StoreError`; they are ordinary values returned from transaction bodies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A document read by the transaction changed before commit.
    ///
    /// Stores re-execute the transaction body when they see this error, both
    /// when it comes from their own commit validation and when a body returns
    /// it to request a fresh snapshot.
    #[error("Write conflict: {detail}")]
    Conflict {
        /// What conflicted (document key or backend detail).
        detail: String,
    },

    /// The store gave up re-executing a conflicting transaction.
    #[error("Transaction aborted after {attempts} attempts")]
    RetriesExhausted {
        /// Total number of body executions, including the first.
        attempts: usize,
    },

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend rejected an operation.
    #[error("Database error: {0}")]
    Database(String),

    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Build a conflict error.
    #[must_use]
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    /// Whether re-running the transaction against a fresh snapshot may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
