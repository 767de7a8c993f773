use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prearc_services::{EventCategory, Principal};
use prearc_types::SessionLocator;

/// Caller-supplied parameters of an archive (or validation) request.
///
/// Label fields are consulted in order: `label`, `typed_label`,
/// `label_param`, the labeling plugin, `descriptor_label`, the staging
/// folder, the raw study id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveParams {
    /// Explicit destination label.
    pub label: Option<String>,
    /// Type-qualified label field (`<session type>/label`).
    pub typed_label: Option<String>,
    /// Generic `label` request parameter.
    pub label_param: Option<String>,
    /// Label embedded in the session descriptor.
    pub descriptor_label: Option<String>,
    /// Destination session id to merge into.
    pub destination_id: Option<String>,
    /// Subject label or id; overrides the one recorded on the session.
    pub subject: Option<String>,
    /// Create the subject when it does not exist.
    pub allow_subject_create: bool,
    /// Merge into an existing destination.
    pub allow_merge: bool,
    /// Bypass overridable conflicts (study UID mismatch, duplicate UID,
    /// scan number conflicts).
    pub override_conflicts: bool,
    /// Proceed although an audit record on the destination is open.
    pub override_open_workflow: bool,
    /// Explicit quarantine flag; the project's code applies when absent.
    pub quarantine: Option<bool>,
    /// Do not announce downstream triggers.
    pub suppress_triggers: bool,
    pub category: EventCategory,
    pub justification: Option<String>,
}

impl Default for ArchiveParams {
    fn default() -> Self {
        Self {
            label: None,
            typed_label: None,
            label_param: None,
            descriptor_label: None,
            destination_id: None,
            subject: None,
            allow_subject_create: true,
            allow_merge: false,
            override_conflicts: false,
            override_open_workflow: false,
            quarantine: None,
            suppress_triggers: false,
            category: EventCategory::Transfer,
            justification: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub session: SessionLocator,
    pub principal: Principal,
    pub params: ArchiveParams,
}

impl ArchiveRequest {
    pub fn new(session: SessionLocator, principal: Principal) -> Self {
        Self {
            session,
            principal,
            params: ArchiveParams::default(),
        }
    }

    pub fn with_params(mut self, params: ArchiveParams) -> Self {
        self.params = params;
        self
    }
}

/// Site policy for merges.
#[derive(Clone, Debug)]
pub struct MergeSettings {
    pub archive_root: PathBuf,
    /// Holding area for partially merged destinations.
    pub failed_root: PathBuf,
    pub allow_cross_modality_merge: bool,
    pub require_unique_study_uid: bool,
    /// Turn scan number conflicts into id corrections.
    pub correct_scan_ids: bool,
    /// Pause before the single retry of a transiently failed subject
    /// creation.
    pub subject_retry_delay: Duration,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("archive"),
            failed_root: PathBuf::from("failed"),
            allow_cross_modality_merge: false,
            require_unique_study_uid: true,
            correct_scan_ids: true,
            subject_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Result of a successful archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub project: String,
    pub session_id: String,
    pub label: String,
    pub subject_id: String,
    /// The destination did not exist before.
    pub created: bool,
    pub path: PathBuf,
    pub scans: usize,
    pub quarantined: bool,
    /// Warnings raised on the way (scan id corrections, new subject).
    pub warnings: Vec<prearc_types::Notice>,
}
