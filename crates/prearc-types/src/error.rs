use thiserror::Error;

use crate::status::SessionStatus;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid session timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid session locator {0:?}: expected <project>/<timestamp>/<folder>")]
    InvalidLocator(String),

    #[error("invalid label {label:?}: {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// How a caller should react to a failed import or archive call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed parameters, missing identifiers, permission denied. No
    /// state was changed.
    ClientInput,
    /// Identity mismatch with the destination; retrying with overrides may
    /// succeed.
    Conflict,
    /// I/O, lock contention, backend hiccups. Retrying later may succeed.
    Transient,
    /// Anything else; reported as a generic server error.
    Fatal,
}
