//! Error types for the import path.

use std::io;
use std::path::PathBuf;

use prearc_dicom::DicomError;
use prearc_locks::LockError;
use prearc_services::ServiceError;
use prearc_store::StoreError;
use prearc_types::{ErrorCategory, Operation, SessionLocator, SessionStatus, TypeError};
use thiserror::Error;

/// Errors that can occur while importing objects or queueing operations.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Dicom(#[from] DicomError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The object carries no study instance UID to group it by.
    #[error("object has no study instance UID")]
    MissingStudyUid,

    /// Another writer holds the same `(scan, filename)` pair.
    #[error("concurrent write of {file} in scan {scan} of {session}")]
    ConcurrentWrite {
        session: SessionLocator,
        scan: String,
        file: String,
    },

    /// Anonymization failed; the file was removed again.
    #[error("anonymization of {} failed: {message}", file.display())]
    Anonymization {
        file: PathBuf,
        message: String,
        /// The session was created by this call and rolled back.
        session_removed: bool,
    },

    /// The operation has no queued status (only `Import`).
    #[error("operation {0} cannot be queued")]
    NotQueueable(Operation),

    /// The session is busy or finished and cannot take another operation.
    #[error("session {session} is {status}; cannot queue {operation}")]
    AlreadyQueued {
        session: SessionLocator,
        status: SessionStatus,
        operation: Operation,
    },

    /// The session started an operation while the object was being
    /// written; the write was rolled back.
    #[error("session {session} is {status} and no longer accepts objects")]
    SessionClosed {
        session: SessionLocator,
        status: SessionStatus,
    },

    #[error("staging session not found: {0}")]
    SessionNotFound(SessionLocator),
}

impl StagingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Dicom(e) if e.is_client_input() => ErrorCategory::ClientInput,
            Self::MissingStudyUid
            | Self::NotQueueable(_)
            | Self::SessionNotFound(_)
            | Self::Type(_) => ErrorCategory::ClientInput,
            Self::Service(ServiceError::Forbidden { .. }) => ErrorCategory::ClientInput,
            Self::AlreadyQueued { .. } => ErrorCategory::Conflict,
            Self::ConcurrentWrite { .. } | Self::SessionClosed { .. } | Self::Lock(_) | Self::Io(_) | Self::Dicom(_) => {
                ErrorCategory::Transient
            }
            Self::Store(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Zip(_) | Self::Walk(_) => ErrorCategory::ClientInput,
            Self::Store(_)
            | Self::Service(_)
            | Self::Catalog(_)
            | Self::Anonymization { .. } => ErrorCategory::Fatal,
        }
    }
}

/// Convenience type alias for staging operations.
pub type StagingResult<T> = std::result::Result<T, StagingError>;
