//! Subject lookup and creation.

use std::time::Duration;

use tracing::{info, warn};

use prearc_locks::{LockScope, LockToken};
use prearc_store::{ArchiveStore, StoreError, SubjectRecord};

use crate::error::MergeResult;

/// What the merge will do about the session's subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectPlan {
    Existing(SubjectRecord),
    /// Nothing matched; a subject with this label is to be created.
    Create { project: String, label: String },
}

impl SubjectPlan {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Existing(s) => Some(&s.id),
            Self::Create { .. } => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Existing(s) => &s.label,
            Self::Create { label, .. } => label,
        }
    }
}

/// Find the subject by label in the project (case-insensitive), then by
/// archive id in any project.
pub fn lookup_subject(archive: &dyn ArchiveStore, project: &str, identifier: &str) -> MergeResult<SubjectPlan> {
    if let Some(subject) = archive.find_subject(project, identifier)? {
        return Ok(SubjectPlan::Existing(subject));
    }
    if let Some(subject) = archive.subject_by_id(identifier)? {
        return Ok(SubjectPlan::Existing(subject));
    }
    Ok(SubjectPlan::Create {
        project: project.to_string(),
        label: identifier.to_string(),
    })
}

/// Return the subject, creating it under its subject lock.
///
/// The lock waits with backoff. A creator that loses a race finds the winner's
/// record. A transient store failure is retried once after `retry_delay`.
pub fn ensure_subject(
    archive: &dyn ArchiveStore,
    scope: &mut LockScope,
    project: &str,
    label: &str,
    retry_delay: Duration,
) -> MergeResult<SubjectRecord> {
    let token = LockToken::subject(project, label);
    scope.acquire(token.clone())?;
    let result = match find_or_create(archive, project, label) {
        Err(e) if e.is_transient() => {
            warn!(project, label, error = %e, "subject creation failed; retrying once");
            std::thread::sleep(retry_delay);
            find_or_create(archive, project, label)
        }
        other => other,
    };
    scope.release(&token)?;
    Ok(result?)
}

fn find_or_create(archive: &dyn ArchiveStore, project: &str, label: &str) -> Result<SubjectRecord, StoreError> {
    if let Some(subject) = archive.find_subject(project, label)? {
        return Ok(subject);
    }
    match archive.create_subject(project, label) {
        Ok(subject) => {
            info!(project, label, id = %subject.id, "subject created");
            Ok(subject)
        }
        Err(StoreError::AlreadyExists { .. }) => archive
            .find_subject(project, label)?
            .ok_or_else(|| StoreError::not_found("subject", label)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prearc_locks::{InMemoryLockRegistry, LockPolicy, LockRegistry, ShutdownSignal};
    use prearc_store::{InMemoryArchiveStore, ProjectRecord, ArchivedSession};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scope(locks: Arc<InMemoryLockRegistry>) -> LockScope {
        LockScope::new(locks, LockPolicy::default(), ShutdownSignal::new())
    }

    #[test]
    fn lookup_by_label_then_id() {
        let archive = InMemoryArchiveStore::new("/arc", "site").with_project("P1").unwrap();
        let s = archive.create_subject("P1", "Doe").unwrap();
        assert_eq!(lookup_subject(&archive, "P1", "DOE").unwrap(), SubjectPlan::Existing(s.clone()));
        assert_eq!(lookup_subject(&archive, "P1", &s.id).unwrap().id(), Some(s.id.as_str()));
        let plan = lookup_subject(&archive, "P1", "Roe").unwrap();
        assert_eq!(plan.id(), None);
        assert_eq!(plan.label(), "Roe");
    }

    #[test]
    fn ensure_creates_once_and_releases_lock() {
        let archive = InMemoryArchiveStore::new("/arc", "site").with_project("P1").unwrap();
        let locks = Arc::new(InMemoryLockRegistry::new());
        let mut sc = scope(locks.clone());
        let a = ensure_subject(&archive, &mut sc, "P1", "S1", Duration::ZERO).unwrap();
        let b = ensure_subject(&archive, &mut sc, "P1", "s1", Duration::ZERO).unwrap();
        assert_eq!(a, b);
        assert!(locks.held().unwrap().is_empty());
    }

    #[test]
    fn concurrent_creators_agree() {
        let archive = Arc::new(InMemoryArchiveStore::new("/arc", "site").with_project("P1").unwrap());
        let locks = Arc::new(InMemoryLockRegistry::new());
        let policy = LockPolicy {
            subject_interval: Duration::from_millis(1),
            ..LockPolicy::default()
        };
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let archive = archive.clone();
                let locks = locks.clone();
                let policy = policy.clone();
                std::thread::spawn(move || {
                    let mut sc = LockScope::new(locks, policy, ShutdownSignal::new());
                    ensure_subject(archive.as_ref(), &mut sc, "P1", "S1", Duration::ZERO).unwrap()
                })
            })
            .collect();
        let ids: std::collections::BTreeSet<String> =
            handles.into_iter().map(|h| h.join().unwrap().id).collect();
        assert_eq!(ids.len(), 1);
    }

    /// Fails the first subject creation with a transient error.
    struct FlakyOnce {
        inner: InMemoryArchiveStore,
        failures: AtomicUsize,
    }

    impl ArchiveStore for FlakyOnce {
        fn project(&self, id: &str) -> prearc_store::StoreResult<Option<ProjectRecord>> {
            self.inner.project(id)
        }
        fn save_project(&self, project: &ProjectRecord) -> prearc_store::StoreResult<()> {
            self.inner.save_project(project)
        }
        fn find_subject(&self, project: &str, label: &str) -> prearc_store::StoreResult<Option<SubjectRecord>> {
            self.inner.find_subject(project, label)
        }
        fn subject_by_id(&self, id: &str) -> prearc_store::StoreResult<Option<SubjectRecord>> {
            self.inner.subject_by_id(id)
        }
        fn create_subject(&self, project: &str, label: &str) -> prearc_store::StoreResult<SubjectRecord> {
            if self.failures.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Transient("connection reset".into()));
            }
            self.inner.create_subject(project, label)
        }
        fn session_by_id(&self, id: &str) -> prearc_store::StoreResult<Option<ArchivedSession>> {
            self.inner.session_by_id(id)
        }
        fn find_session(&self, project: &str, label: &str) -> prearc_store::StoreResult<Option<ArchivedSession>> {
            self.inner.find_session(project, label)
        }
        fn sessions_by_study_uid(&self, project: &str, uid: &str) -> prearc_store::StoreResult<Vec<ArchivedSession>> {
            self.inner.sessions_by_study_uid(project, uid)
        }
        fn mint_session_id(&self) -> prearc_store::StoreResult<String> {
            self.inner.mint_session_id()
        }
        fn save_session(&self, session: &ArchivedSession) -> prearc_store::StoreResult<()> {
            self.inner.save_session(session)
        }
        fn delete_session(&self, id: &str) -> prearc_store::StoreResult<bool> {
            self.inner.delete_session(id)
        }
        fn resolve_session_dir(&self, project: &str, label: &str) -> prearc_store::StoreResult<PathBuf> {
            self.inner.resolve_session_dir(project, label)
        }
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let archive = FlakyOnce {
            inner: InMemoryArchiveStore::new("/arc", "site").with_project("P1").unwrap(),
            failures: AtomicUsize::new(0),
        };
        let mut sc = scope(Arc::new(InMemoryLockRegistry::new()));
        let s = ensure_subject(&archive, &mut sc, "P1", "S1", Duration::ZERO).unwrap();
        assert_eq!(s.label, "S1");
        assert_eq!(archive.failures.load(Ordering::SeqCst), 2);
    }
}
