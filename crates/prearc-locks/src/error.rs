//! Error types for lock operations.

use std::time::Duration;

use thiserror::Error;

use crate::token::LockToken;

/// Errors that can occur while acquiring or releasing locks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another unit of work holds the token (fail-fast discipline).
    #[error("duplicate operation in progress: {token}")]
    Contended { token: LockToken },

    /// A backoff wait was interrupted by shutdown.
    #[error("interrupted while waiting for {token}")]
    Interrupted { token: LockToken },

    /// A backoff wait exceeded its configured limit.
    #[error("timed out after {waited:?} waiting for {token}")]
    TimedOut { token: LockToken, waited: Duration },

    /// The token string is empty or malformed.
    #[error("invalid lock token: {0:?}")]
    InvalidToken(String),

    /// The registry's internal state is unusable.
    #[error("lock registry poisoned: {0}")]
    Poisoned(String),

    /// Backend failure (network, TTL store, ...).
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Convenience type alias for lock operations.
pub type LockResult<T> = std::result::Result<T, LockError>;
