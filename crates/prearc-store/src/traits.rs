//! Record-store contracts.
//!
//! The store offers read-committed isolation only. The one cross-record
//! guarantee it makes is [`StagingStore::find_or_create`]; everything else
//! that must be atomic across calls is layered on top with the lock registry.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use prearc_types::{SessionKey, SessionLocator, SessionStatus, StagingSession};

use crate::error::StoreResult;
use crate::records::{ArchivedSession, ProjectRecord, SubjectRecord};

/// Outcome of [`StagingStore::find_or_create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// The candidate was inserted.
    Created(StagingSession),
    /// An accepting session with the same key already existed.
    Existing(StagingSession),
}

impl Resolved {
    pub fn session(&self) -> &StagingSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    pub fn into_session(self) -> StagingSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Staging session records.
pub trait StagingStore: Send + Sync {
    /// Return the session that accepts objects under the candidate's
    /// [`SessionKey`], inserting the candidate if there is none.
    ///
    /// Atomic: of any number of concurrent calls with the same key, exactly
    /// one returns `Created`. Busy sessions (queued, in progress, finished)
    /// never match. If the candidate's locator is taken by another session
    /// its timestamp is advanced until it is unique.
    fn find_or_create(&self, candidate: StagingSession) -> StoreResult<Resolved>;

    fn get(&self, locator: &SessionLocator) -> StoreResult<Option<StagingSession>>;

    /// Every session with the given key, any status, newest first.
    fn find_by_key(&self, key: &SessionKey) -> StoreResult<Vec<StagingSession>>;

    /// Replace an existing record (matched by locator).
    fn update(&self, session: &StagingSession) -> StoreResult<()>;

    /// Returns `Ok(true)` if the record existed.
    fn delete(&self, locator: &SessionLocator) -> StoreResult<bool>;

    /// All sessions, optionally restricted to one project directory, ordered
    /// by locator.
    fn list(&self, project: Option<&str>) -> StoreResult<Vec<StagingSession>>;

    /// Apply a checked status change and return the updated record.
    fn transition(&self, locator: &SessionLocator, to: SessionStatus)
        -> StoreResult<StagingSession>;

    /// Record the arrival of another object. A `Ready` session goes back to
    /// `Receiving`; `last_modified` is only rewritten when older than
    /// `min_interval`. Returns the updated record.
    fn touch(
        &self,
        locator: &SessionLocator,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> StoreResult<StagingSession>;
}

/// Archived projects, subjects and sessions.
pub trait ArchiveStore: Send + Sync {
    fn project(&self, id: &str) -> StoreResult<Option<ProjectRecord>>;

    fn save_project(&self, project: &ProjectRecord) -> StoreResult<()>;

    /// Subject by label inside a project, case-insensitive.
    fn find_subject(&self, project: &str, label: &str) -> StoreResult<Option<SubjectRecord>>;

    /// Subject by archive id, in any project.
    fn subject_by_id(&self, id: &str) -> StoreResult<Option<SubjectRecord>>;

    /// Create a subject, minting its id. Fails with `AlreadyExists` if the
    /// label is taken in the project.
    fn create_subject(&self, project: &str, label: &str) -> StoreResult<SubjectRecord>;

    fn session_by_id(&self, id: &str) -> StoreResult<Option<ArchivedSession>>;

    fn find_session(&self, project: &str, label: &str) -> StoreResult<Option<ArchivedSession>>;

    /// Sessions in a project carrying the given study UID.
    fn sessions_by_study_uid(&self, project: &str, uid: &str)
        -> StoreResult<Vec<ArchivedSession>>;

    /// A fresh, never-used session id.
    fn mint_session_id(&self) -> StoreResult<String>;

    /// Insert or replace a session record.
    fn save_session(&self, session: &ArchivedSession) -> StoreResult<()>;

    fn delete_session(&self, id: &str) -> StoreResult<bool>;

    /// Directory an archived session with this label lives (or will live) in.
    /// Fails with `NotFound` for an unknown project.
    fn resolve_session_dir(&self, project: &str, label: &str) -> StoreResult<PathBuf>;
}
