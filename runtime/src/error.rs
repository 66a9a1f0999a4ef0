//! Errors returned by loyalty operations.

use fidelidad_core::error::StoreError;
use fidelidad_core::tier::ParseTierError;
use thiserror::Error;

/// Failures of a loyalty operation.
///
/// Business outcomes (insufficient points, exhausted stock, taken email...)
/// are not errors; each operation returns them in its own outcome type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoyaltyError {
    /// Caller input failed validation before any store access.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The tier could not be normalized.
    #[error(transparent)]
    InvalidTier(#[from] ParseTierError),

    /// The caller lacks the role the operation requires.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The store failed or gave up retrying.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LoyaltyError {
    /// Build a validation error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidTier(_) => "INVALID_TIER",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Store(_) => "TRANSACTION_FAILED",
        }
    }
}
