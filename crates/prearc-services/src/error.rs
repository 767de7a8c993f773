//! Error types for collaborator services.

use thiserror::Error;

/// Errors reported by external collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The principal may not perform the action.
    #[error("{principal} may not {action}")]
    Forbidden { principal: String, action: String },

    /// The dispatcher refused or lost a request.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// The audit log could not record an event.
    #[error("audit log error: {0}")]
    Audit(String),

    /// No audit record with this id.
    #[error("audit record not found: {0}")]
    UnknownAuditRecord(String),

    /// The anonymization service failed on a file.
    #[error("anonymization failed: {0}")]
    Anonymization(String),

    /// A post-merge hook failed.
    #[error("hook failed: {0}")]
    Hook(String),

    /// A collaborator's internal state is unusable.
    #[error("service state poisoned: {0}")]
    Poisoned(String),
}

/// Convenience type alias for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

pub(crate) fn poisoned<E: std::fmt::Display>(e: E) -> ServiceError {
    ServiceError::Poisoned(format!("lock poisoned: {e}"))
}
