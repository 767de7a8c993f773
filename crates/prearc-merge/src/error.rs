//! Error types for the merge engine.

use std::io;

use prearc_locks::{LockError, LockToken};
use prearc_services::ServiceError;
use prearc_staging::StagingError;
use prearc_store::StoreError;
use prearc_types::{ErrorCategory, Notice, SessionLocator, TypeError};
use thiserror::Error;

/// Errors that can occur while archiving a staging session.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("staging session not found: {0}")]
    SessionNotFound(SessionLocator),

    #[error("invalid session label {label:?}: {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// No subject identifier is available from the request or the session.
    #[error("no subject given for {0}")]
    MissingSubject(SessionLocator),

    /// The subject does not exist and creating it was not allowed.
    #[error("subject {label} does not exist in {project}")]
    SubjectNotFound { project: String, label: String },

    #[error("staging session {0} holds no files")]
    EmptySession(SessionLocator),

    /// Another archive of the same staging session or destination is running.
    #[error("duplicate archive attempt: {token} is held")]
    DuplicateArchive { token: LockToken },

    /// An audit record on the destination is still open.
    #[error("open workflow on {0}")]
    OpenWorkflow(String),

    /// Identity conflicts with the destination.
    #[error("{} conflict(s): {}", .0.len(), first_message(.0))]
    Conflict(Vec<Notice>),

    /// Every numbered variant of an incoming file name is taken in the
    /// destination scan.
    #[error("no free file name for {0} in the destination")]
    NoFreeName(String),

    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

fn first_message(notices: &[Notice]) -> &str {
    notices.first().map_or("", |n| n.message.as_str())
}

impl From<LockError> for MergeError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Contended { token } => Self::DuplicateArchive { token },
            other => Self::Lock(other),
        }
    }
}

impl MergeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SessionNotFound(_)
            | Self::InvalidLabel { .. }
            | Self::ProjectNotFound(_)
            | Self::MissingSubject(_)
            | Self::SubjectNotFound { .. }
            | Self::EmptySession(_)
            | Self::Type(_) => ErrorCategory::ClientInput,
            Self::Service(ServiceError::Forbidden { .. }) => ErrorCategory::ClientInput,
            Self::Conflict(_) | Self::OpenWorkflow(_) => ErrorCategory::Conflict,
            Self::DuplicateArchive { .. } | Self::Lock(_) | Self::Io(_) | Self::Walk(_) => {
                ErrorCategory::Transient
            }
            Self::Store(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Staging(e) => e.category(),
            Self::Store(_) | Self::Service(_) | Self::NoFreeName(_) => ErrorCategory::Fatal,
        }
    }

    /// The notices of a conflict error; empty for anything else.
    pub fn notices(&self) -> &[Notice] {
        match self {
            Self::Conflict(notices) => notices,
            _ => &[],
        }
    }
}

/// Convenience type alias for merge operations.
pub type MergeResult<T> = std::result::Result<T, MergeError>;
