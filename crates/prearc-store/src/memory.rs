//! In-memory record stores for tests, the CLI and single-process use.
//!
//! Both stores keep their records in maps behind one `RwLock`; every trait
//! method holds the lock for its whole body, which makes
//! [`StagingStore::find_or_create`] atomic.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use prearc_types::{SessionKey, SessionLocator, SessionStatus, StagingSession};

use crate::error::{StoreError, StoreResult};
use crate::records::{ArchivedSession, ProjectRecord, SubjectRecord};
use crate::traits::{ArchiveStore, Resolved, StagingStore};

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Poisoned(format!("lock poisoned: {e}"))
}

/// An in-memory implementation of [`StagingStore`].
#[derive(Debug, Default)]
pub struct InMemoryStagingStore {
    sessions: RwLock<BTreeMap<SessionLocator, StagingSession>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<SessionLocator, StagingSession>>> {
        self.sessions.read().map_err(poisoned)
    }

    fn write(
        &self,
    ) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<SessionLocator, StagingSession>>> {
        self.sessions.write().map_err(poisoned)
    }
}

impl StagingStore for InMemoryStagingStore {
    fn find_or_create(&self, mut candidate: StagingSession) -> StoreResult<Resolved> {
        let key = candidate.key();
        let mut sessions = self.write()?;

        let existing = sessions
            .values()
            .filter(|s| s.status.accepts_objects() && s.key() == key)
            .max_by_key(|s| s.timestamp);
        if let Some(existing) = existing {
            return Ok(Resolved::Existing(existing.clone()));
        }

        while sessions.contains_key(&candidate.locator()) {
            candidate.timestamp = candidate.timestamp.next();
        }
        debug!(session = %candidate.locator(), uid = %candidate.study_instance_uid, "staging session created");
        sessions.insert(candidate.locator(), candidate.clone());
        Ok(Resolved::Created(candidate))
    }

    fn get(&self, locator: &SessionLocator) -> StoreResult<Option<StagingSession>> {
        Ok(self.read()?.get(locator).cloned())
    }

    fn find_by_key(&self, key: &SessionKey) -> StoreResult<Vec<StagingSession>> {
        let sessions = self.read()?;
        let mut found: Vec<StagingSession> = sessions
            .values()
            .filter(|s| &s.key() == key)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(found)
    }

    fn update(&self, session: &StagingSession) -> StoreResult<()> {
        let mut sessions = self.write()?;
        match sessions.get_mut(&session.locator()) {
            Some(slot) => {
                *slot = session.clone();
                Ok(())
            }
            None => Err(StoreError::not_found(
                "staging session",
                session.locator().to_string(),
            )),
        }
    }

    fn delete(&self, locator: &SessionLocator) -> StoreResult<bool> {
        Ok(self.write()?.remove(locator).is_some())
    }

    fn list(&self, project: Option<&str>) -> StoreResult<Vec<StagingSession>> {
        let sessions = self.read()?;
        Ok(sessions
            .iter()
            .filter(|(loc, _)| project.map_or(true, |p| loc.project == p))
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn transition(
        &self,
        locator: &SessionLocator,
        to: SessionStatus,
    ) -> StoreResult<StagingSession> {
        let mut sessions = self.write()?;
        let session = sessions
            .get_mut(locator)
            .ok_or_else(|| StoreError::not_found("staging session", locator.to_string()))?;
        let from = session.status;
        session.status = from.transition(to)?;
        debug!(session = %locator, %from, %to, "status changed");
        Ok(session.clone())
    }

    fn touch(
        &self,
        locator: &SessionLocator,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> StoreResult<StagingSession> {
        let mut sessions = self.write()?;
        let session = sessions
            .get_mut(locator)
            .ok_or_else(|| StoreError::not_found("staging session", locator.to_string()))?;
        if session.status == SessionStatus::Ready {
            session.status = SessionStatus::Receiving;
        }
        if session.refresh_due(now, min_interval) {
            session.last_modified = now;
        }
        Ok(session.clone())
    }
}

#[derive(Debug, Default)]
struct ArchiveState {
    projects: HashMap<String, ProjectRecord>,
    subjects: BTreeMap<String, SubjectRecord>,
    sessions: BTreeMap<String, ArchivedSession>,
    next_subject: u64,
    next_session: u64,
}

/// An in-memory implementation of [`ArchiveStore`].
///
/// Ids are minted as `<site>_S00001` (subjects) and `<site>_E00001`
/// (sessions). New sessions live in `<root>/<project>/arc001/<label>`.
#[derive(Debug)]
pub struct InMemoryArchiveStore {
    root: PathBuf,
    site: String,
    state: RwLock<ArchiveState>,
}

impl InMemoryArchiveStore {
    pub fn new(root: impl Into<PathBuf>, site: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            site: site.into(),
            state: RwLock::new(ArchiveState::default()),
        }
    }

    /// Convenience for setup code: register a project with default settings.
    pub fn with_project(self, id: &str) -> StoreResult<Self> {
        self.save_project(&ProjectRecord::new(id))?;
        Ok(self)
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, ArchiveState>> {
        self.state.read().map_err(poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, ArchiveState>> {
        self.state.write().map_err(poisoned)
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn project(&self, id: &str) -> StoreResult<Option<ProjectRecord>> {
        Ok(self.read()?.projects.get(id).cloned())
    }

    fn save_project(&self, project: &ProjectRecord) -> StoreResult<()> {
        self.write()?
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    fn find_subject(&self, project: &str, label: &str) -> StoreResult<Option<SubjectRecord>> {
        let state = self.read()?;
        Ok(state
            .subjects
            .values()
            .find(|s| s.project == project && s.label.eq_ignore_ascii_case(label))
            .cloned())
    }

    fn subject_by_id(&self, id: &str) -> StoreResult<Option<SubjectRecord>> {
        Ok(self.read()?.subjects.get(id).cloned())
    }

    fn create_subject(&self, project: &str, label: &str) -> StoreResult<SubjectRecord> {
        let mut state = self.write()?;
        if !state.projects.contains_key(project) {
            return Err(StoreError::not_found("project", project));
        }
        if state
            .subjects
            .values()
            .any(|s| s.project == project && s.label.eq_ignore_ascii_case(label))
        {
            return Err(StoreError::AlreadyExists {
                kind: "subject",
                id: format!("{project}/{label}"),
            });
        }
        state.next_subject += 1;
        let record = SubjectRecord {
            id: format!("{}_S{:05}", self.site, state.next_subject),
            project: project.to_string(),
            label: label.to_string(),
        };
        state.subjects.insert(record.id.clone(), record.clone());
        debug!(subject = %record.id, project, label, "subject created");
        Ok(record)
    }

    fn session_by_id(&self, id: &str) -> StoreResult<Option<ArchivedSession>> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    fn find_session(&self, project: &str, label: &str) -> StoreResult<Option<ArchivedSession>> {
        let state = self.read()?;
        Ok(state
            .sessions
            .values()
            .find(|s| s.project == project && s.label == label)
            .cloned())
    }

    fn sessions_by_study_uid(
        &self,
        project: &str,
        uid: &str,
    ) -> StoreResult<Vec<ArchivedSession>> {
        let state = self.read()?;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.project == project && s.study_instance_uid.as_deref() == Some(uid))
            .cloned()
            .collect())
    }

    fn mint_session_id(&self) -> StoreResult<String> {
        let mut state = self.write()?;
        loop {
            state.next_session += 1;
            let id = format!("{}_E{:05}", self.site, state.next_session);
            if !state.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    fn save_session(&self, session: &ArchivedSession) -> StoreResult<()> {
        self.write()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete_session(&self, id: &str) -> StoreResult<bool> {
        Ok(self.write()?.sessions.remove(id).is_some())
    }

    fn resolve_session_dir(&self, project: &str, label: &str) -> StoreResult<PathBuf> {
        let state = self.read()?;
        if !state.projects.contains_key(project) {
            return Err(StoreError::not_found("project", project));
        }
        if let Some(existing) = state
            .sessions
            .values()
            .find(|s| s.project == project && s.label == label)
        {
            return Ok(existing.path.clone());
        }
        Ok(self.root.join(project).join("arc001").join(label))
    }
}
