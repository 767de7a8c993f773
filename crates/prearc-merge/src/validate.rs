//! Pre-archive validation.

use tracing::{debug, info_span};

use prearc_types::Notice;

use crate::engine::{Locking, MergeEngine};
use crate::error::MergeResult;
use crate::reporter::Reporter;
use crate::request::ArchiveRequest;

impl MergeEngine {
    /// Run every check [`MergeEngine::archive`] would run, without taking
    /// locks or moving files, and report all findings.
    ///
    /// Notices are one per code, ascending by code. An empty list means the
    /// archive would go through. If the destination directory cannot be
    /// determined the list stops with the findings made up to that point.
    pub fn validate(&self, request: &ArchiveRequest) -> MergeResult<Vec<Notice>> {
        let span = info_span!("validate", session = %request.session);
        let _guard = span.enter();

        let mut reporter = Reporter::collect();
        if let Some(pre) = self.preflight(request, &mut reporter, Locking::Probe)? {
            self.plan(request, &pre, &mut reporter)?;
        }
        let notices = reporter.finish();
        debug!(findings = notices.len(), "validation finished");
        Ok(notices)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::Fixture;
    use crate::engine::{MergeEngine, MergeServices};
    use crate::request::ArchiveParams;
    use chrono::Utc;
    use prearc_locks::{LockRegistry, LockToken};
    use prearc_store::{
        ArchiveStore, ArchivedSession, InMemoryArchiveStore, ProjectRecord, StagingStore,
        StoreError, StoreResult, SubjectRecord,
    };
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Archive store that cannot place new sessions on disk.
    struct NoLayout(Arc<InMemoryArchiveStore>);

    impl ArchiveStore for NoLayout {
        fn project(&self, id: &str) -> StoreResult<Option<ProjectRecord>> {
            self.0.project(id)
        }
        fn save_project(&self, project: &ProjectRecord) -> StoreResult<()> {
            self.0.save_project(project)
        }
        fn find_subject(&self, project: &str, label: &str) -> StoreResult<Option<SubjectRecord>> {
            self.0.find_subject(project, label)
        }
        fn subject_by_id(&self, id: &str) -> StoreResult<Option<SubjectRecord>> {
            self.0.subject_by_id(id)
        }
        fn create_subject(&self, project: &str, label: &str) -> StoreResult<SubjectRecord> {
            self.0.create_subject(project, label)
        }
        fn session_by_id(&self, id: &str) -> StoreResult<Option<ArchivedSession>> {
            self.0.session_by_id(id)
        }
        fn find_session(&self, project: &str, label: &str) -> StoreResult<Option<ArchivedSession>> {
            self.0.find_session(project, label)
        }
        fn sessions_by_study_uid(&self, project: &str, uid: &str) -> StoreResult<Vec<ArchivedSession>> {
            self.0.sessions_by_study_uid(project, uid)
        }
        fn mint_session_id(&self) -> StoreResult<String> {
            self.0.mint_session_id()
        }
        fn save_session(&self, session: &ArchivedSession) -> StoreResult<()> {
            self.0.save_session(session)
        }
        fn delete_session(&self, id: &str) -> StoreResult<bool> {
            self.0.delete_session(id)
        }
        fn resolve_session_dir(&self, _project: &str, _label: &str) -> StoreResult<PathBuf> {
            Err(StoreError::Transient("archive layout unavailable".into()))
        }
    }

    fn without_layout(fx: &Fixture) -> MergeEngine {
        let services = MergeServices {
            archive: Arc::new(NoLayout(fx.archive.clone())),
            ..fx.engine.services().clone()
        };
        MergeEngine::new(services, fx.engine.settings().clone())
    }
    use prearc_types::{NoticeKind, SessionStatus};

    fn codes(notices: &[prearc_types::Notice]) -> Vec<u16> {
        notices.iter().map(|n| n.code.value()).collect()
    }

    #[test]
    fn clean_session_has_no_blocking_findings() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let notices = fx.engine.validate(&fx.request(&s, ArchiveParams::default())).unwrap();
        assert_eq!(codes(&notices), vec![13]);
        assert_eq!(notices[0].kind, NoticeKind::Warning);
    }

    #[test]
    fn reports_every_identity_conflict_in_code_order() {
        let fx = Fixture::new();
        fx.archive.save_project(&ProjectRecord::new("P2")).unwrap();
        let other = fx.archive.create_subject("P2", "X").unwrap();
        fx.archive.create_subject("P1", "S1").unwrap();
        let dest = ArchivedSession {
            id: "SITE_E09999".into(),
            project: "P2".into(),
            subject_id: other.id,
            label: "OTHER".into(),
            study_instance_uid: Some("9.9".into()),
            modality: Some("CT".into()),
            visit: None,
            scans: vec![],
            quarantined: false,
            path: fx.tmp.path().join("archive/P2/arc001/OTHER"),
            created: Utc::now(),
            last_modified: Utc::now(),
        };
        fx.archive.save_session(&dest).unwrap();

        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let params = ArchiveParams {
            destination_id: Some(dest.id.clone()),
            ..ArchiveParams::default()
        };
        let notices = fx.engine.validate(&fx.request(&s, params)).unwrap();
        assert_eq!(codes(&notices), vec![3, 4, 5, 6, 7, 8]);
        assert!(notices.iter().all(|n| n.is_blocking()));
    }

    #[test]
    fn unknown_project_truncates_after_local_checks() {
        let fx = Fixture::new();
        let s = fx.stage("P9", "MR1", "1.2.3", None, &[]);
        let notices = fx.engine.validate(&fx.request(&s, ArchiveParams::default())).unwrap();
        assert_eq!(codes(&notices), vec![2, 16]);
    }

    #[test]
    fn unknown_destination_dir_truncates_the_list() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        fx.locks.try_acquire(&LockToken::staging(&s.locator())).unwrap();
        let engine = without_layout(&fx);

        // Same session as `running_archive_is_reported_without_locking`, which
        // also reports 13 once the destination is known.
        let notices = engine.validate(&fx.request(&s, ArchiveParams::default())).unwrap();
        assert_eq!(codes(&notices), vec![15]);
        assert_eq!(notices[0].kind, NoticeKind::Failure);
    }

    #[test]
    fn unknown_destination_dir_fails_an_archive() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let err = without_layout(&fx)
            .archive(&fx.request(&s, ArchiveParams::default()))
            .unwrap_err();
        assert!(matches!(err, crate::error::MergeError::Store(StoreError::Transient(_))));
        assert!(s.session_dir().join("1/1.dcm").is_file());
        assert!(fx.locks.held().unwrap().is_empty());
    }

    #[test]
    fn invalid_label_is_reported_and_checks_continue() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[]);
        let params = ArchiveParams {
            label: Some("bad/label".into()),
            ..ArchiveParams::default()
        };
        let notices = fx.engine.validate(&fx.request(&s, params)).unwrap();
        assert_eq!(codes(&notices), vec![1, 16]);
    }

    #[test]
    fn running_archive_is_reported_without_locking() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let token = LockToken::staging(&s.locator());
        fx.locks.try_acquire(&token).unwrap();

        let notices = fx.engine.validate(&fx.request(&s, ArchiveParams::default())).unwrap();
        assert_eq!(codes(&notices), vec![13, 15]);
        assert_eq!(fx.locks.held().unwrap(), vec![token]);
    }

    #[test]
    fn validation_has_no_side_effects() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        fx.engine.validate(&fx.request(&s, ArchiveParams::default())).unwrap();

        let after = fx.staging.get(&s.locator()).unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Receiving);
        assert!(s.session_dir().join("1/1.dcm").is_file());
        assert!(fx.archive.find_subject("P1", "S1").unwrap().is_none());
        assert!(fx.archive.find_session("P1", "MR1").unwrap().is_none());
        assert!(fx.audit.records().unwrap().is_empty());
        assert!(fx.locks.held().unwrap().is_empty());
    }
}
