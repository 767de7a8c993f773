//! Error types for record-store operations.

use prearc_types::TypeError;
use thiserror::Error;

/// Errors that can occur while reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same natural key already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// A status change the state machine does not allow.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A retryable backend failure (connection reset, deadlock victim, ...).
    #[error("transient store failure: {0}")]
    Transient(String),

    /// The store's internal state is unusable.
    #[error("store poisoned: {0}")]
    Poisoned(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Convenience type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
