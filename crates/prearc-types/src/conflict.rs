//! Merge findings.
//!
//! A [`Conflict`] is an identity mismatch between an incoming staging session
//! and its archive destination. A [`Notice`] is the reportable form of any
//! finding (warning, failure or conflict) and carries a stable numeric code so
//! that validation results can be compared across runs.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of identity collided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Destination exists and merging was not requested.
    Exists,
    Label,
    Project,
    Subject,
    Uid,
    Modality,
    /// Incoming scan duplicates a destination scan (same id and UID).
    ScanId,
    /// Incoming scan UID matches a destination scan with another id.
    ScanUid,
    /// Study UID already archived under another session of the project.
    DuplicateUid,
}

/// Whether a conflict can be bypassed by an explicit override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Overridable,
}

/// An immutable identity-conflict record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub message: String,
}

impl Conflict {
    pub fn fatal(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    pub fn overridable(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Overridable,
            message: message.into(),
        }
    }

    /// Stable code for this conflict.
    pub fn code(&self) -> NoticeCode {
        match self.kind {
            ConflictKind::Exists => NoticeCode::MergeNotAllowed,
            ConflictKind::Label => NoticeCode::LabelMod,
            ConflictKind::Project => NoticeCode::ProjectMod,
            ConflictKind::Subject => NoticeCode::SubjectMod,
            ConflictKind::Uid => NoticeCode::UidMod,
            ConflictKind::Modality => NoticeCode::ModalityMod,
            ConflictKind::ScanId => NoticeCode::ScanDuplicate,
            ConflictKind::ScanUid => NoticeCode::ScanNumberConflict,
            ConflictKind::DuplicateUid => NoticeCode::DuplicateStudyUid,
        }
    }

    pub fn to_notice(&self) -> Notice {
        Notice::new(NoticeKind::Conflict, self.code(), self.message.clone())
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} conflict ({:?}): {}", self.kind, self.severity, self.message)
    }
}

/// Category of a reported finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    Warning,
    Failure,
    Conflict,
}

/// Stable numeric notice codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum NoticeCode {
    InvalidLabel = 1,
    ProjectNotFound = 2,
    LabelMod = 3,
    ProjectMod = 4,
    SubjectMod = 5,
    UidMod = 6,
    ModalityMod = 7,
    MergeNotAllowed = 8,
    ScanDuplicate = 9,
    ScanIdCorrected = 10,
    ScanNumberConflict = 11,
    DuplicateStudyUid = 12,
    SubjectCreated = 13,
    OpenWorkflow = 14,
    ArchiveInProgress = 15,
    EmptySession = 16,
    Forbidden = 17,
}

impl NoticeCode {
    pub fn value(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for NoticeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A reportable finding: kind, stable code and human-readable message.
///
/// Notices order by code, then kind, then message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub code: NoticeCode,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, code: NoticeCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn warning(code: NoticeCode, message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Warning, code, message)
    }

    pub fn failure(code: NoticeCode, message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Failure, code, message)
    }

    /// Whether this notice blocks an archive.
    pub fn is_blocking(&self) -> bool {
        self.kind != NoticeKind::Warning
    }
}

impl PartialOrd for Notice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Notice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code
            .cmp(&other.code)
            .then_with(|| kind_rank(self.kind).cmp(&kind_rank(other.kind)))
            .then_with(|| self.message.cmp(&other.message))
    }
}

fn kind_rank(kind: NoticeKind) -> u8 {
    match kind {
        NoticeKind::Failure => 0,
        NoticeKind::Conflict => 1,
        NoticeKind::Warning => 2,
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?} {}] {}", self.kind, self.code, self.message)
    }
}
