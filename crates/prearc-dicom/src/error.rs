//! Error types for header reading, filtering and transcoding.

use std::io;

use thiserror::Error;

use crate::tag::Tag;

/// Errors raised while reading or re-encoding imaging objects.
#[derive(Debug, Error)]
pub enum DicomError {
    /// Underlying read/seek failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream does not carry a Part 10 preamble and `DICM` magic.
    #[error("not a DICOM file: {0}")]
    NotDicom(String),

    /// The stream ended in the middle of an element.
    #[error("truncated element {tag} at offset {offset}")]
    Truncated { tag: Tag, offset: u64 },

    /// An element could not be decoded.
    #[error("malformed element {tag} at offset {offset}: {reason}")]
    Malformed { tag: Tag, offset: u64, reason: String },

    /// The object's transfer syntax cannot be handled by this operation.
    #[error("unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    /// A required identifier is absent after a full header parse.
    #[error("object has no {0}")]
    MissingIdentifier(&'static str),

    /// A tag string could not be parsed.
    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    /// A filter rule could not be compiled.
    #[error("invalid filter rule for {tag}: {reason}")]
    InvalidFilter { tag: String, reason: String },
}

impl DicomError {
    /// Whether the error is caused by the object itself rather than by I/O.
    pub fn is_client_input(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Convenience type alias for DICOM operations.
pub type DicomResult<T> = std::result::Result<T, DicomError>;
