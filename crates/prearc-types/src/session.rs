use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::status::SessionStatus;
use crate::timestamp::SessionTimestamp;

/// Directory used for sessions whose project is not known yet.
pub const UNASSIGNED_PROJECT_DIR: &str = "Unassigned";

/// Where a session's bytes are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageTarget {
    /// The staging area; merged into the archive later.
    Prearchive,
    /// The direct-to-archive fast path.
    DirectArchive,
}

/// Unique storage location of a staging session:
/// `<root>/<project>/<timestamp>/<folder>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionLocator {
    /// Project directory name ([`UNASSIGNED_PROJECT_DIR`] when unassigned).
    pub project: String,
    pub timestamp: SessionTimestamp,
    pub folder: String,
}

impl SessionLocator {
    pub fn new(
        project: impl Into<String>,
        timestamp: SessionTimestamp,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            timestamp,
            folder: folder.into(),
        }
    }

    /// Path of the session directory below `root`.
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        root.join(&self.project)
            .join(self.timestamp.folder_name())
            .join(&self.folder)
    }
}

impl FromStr for SessionLocator {
    type Err = TypeError;

    /// Parses the `Display` form, `<project>/<timestamp>/<folder>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidLocator(s.to_string());
        let mut parts = s.splitn(3, '/');
        let (Some(project), Some(timestamp), Some(folder)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if project.is_empty() || folder.is_empty() || folder.contains('/') {
            return Err(invalid());
        }
        Ok(Self::new(project, timestamp.parse()?, folder))
    }
}

impl fmt::Debug for SessionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionLocator({self})")
    }
}

impl fmt::Display for SessionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.timestamp, self.folder)
    }
}

/// Dedup key: concurrent objects sharing it must resolve to the same session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub project: Option<String>,
    pub study_instance_uid: String,
    /// Only populated when the site separates sessions by modality.
    pub modality: Option<String>,
}

/// A not-yet-permanent grouping of imaging objects awaiting merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingSession {
    /// Owning project; `None` until late-bound.
    pub project: Option<String>,
    pub subject: Option<String>,
    /// Session label as derived or requested.
    pub label: String,
    /// Directory name of the session; the sanitized label.
    pub folder: String,
    pub timestamp: SessionTimestamp,
    pub study_instance_uid: String,
    pub modality: Option<String>,
    pub visit: Option<String>,
    pub status: SessionStatus,
    /// Storage root the session directory hangs below.
    pub root: PathBuf,
    pub target: StorageTarget,
    /// Identifier of the sender (AE title, upload client, ...).
    pub source: Option<String>,
    pub uploaded: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub prevent_anonymization: bool,
    pub prevent_auto_commit: bool,
    /// Whether the session key includes the modality.
    pub separated_by_modality: bool,
}

impl StagingSession {
    /// A fresh `RECEIVING` session below `root`.
    pub fn new(
        project: Option<String>,
        label: impl Into<String>,
        study_instance_uid: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        let label = label.into();
        let now = Utc::now();
        Self {
            project,
            subject: None,
            folder: crate::label::sanitize_label(&label),
            label,
            timestamp: SessionTimestamp::from_datetime(now),
            study_instance_uid: study_instance_uid.into(),
            modality: None,
            visit: None,
            status: SessionStatus::Receiving,
            root: root.into(),
            target: StorageTarget::Prearchive,
            source: None,
            uploaded: now,
            last_modified: now,
            prevent_anonymization: false,
            prevent_auto_commit: false,
            separated_by_modality: false,
        }
    }

    /// Project directory name.
    pub fn project_dir(&self) -> &str {
        self.project.as_deref().unwrap_or(UNASSIGNED_PROJECT_DIR)
    }

    pub fn locator(&self) -> SessionLocator {
        SessionLocator::new(self.project_dir(), self.timestamp, self.folder.clone())
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            project: self.project.clone(),
            study_instance_uid: self.study_instance_uid.clone(),
            modality: if self.separated_by_modality {
                self.modality.clone()
            } else {
                None
            },
        }
    }

    /// Absolute path of the session directory.
    pub fn session_dir(&self) -> PathBuf {
        self.locator().dir_under(&self.root)
    }

    /// Whether the last-modified stamp is older than `min_interval`.
    pub fn refresh_due(&self, now: DateTime<Utc>, min_interval: chrono::Duration) -> bool {
        now - self.last_modified > min_interval
    }
}
