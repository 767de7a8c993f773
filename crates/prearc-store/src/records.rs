use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happens to a session archived into a project without an explicit
/// quarantine flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineCode {
    #[default]
    None,
    Quarantine,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub quarantine_code: QuarantineCode,
    /// Skip the study-UID consistency and uniqueness checks.
    pub uid_check_opt_out: bool,
}

impl ProjectRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quarantine_code: QuarantineCode::None,
            uid_check_opt_out: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: String,
    pub project: String,
    pub label: String,
}

/// One scan of an archived session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub series_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub description: Option<String>,
    pub file_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub id: String,
    pub project: String,
    pub subject_id: String,
    pub label: String,
    pub study_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub visit: Option<String>,
    pub scans: Vec<ScanRecord>,
    pub quarantined: bool,
    /// Session directory in the archive.
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl ArchivedSession {
    pub fn scan(&self, id: &str) -> Option<&ScanRecord> {
        self.scans.iter().find(|s| s.id == id)
    }
}
