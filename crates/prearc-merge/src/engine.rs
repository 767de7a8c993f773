//! The archive merge engine.
//!
//! [`MergeEngine::archive`] moves one staging session into the archive:
//!
//! 1. permission, label, project, duplicate-attempt and emptiness checks
//! 2. destination lookup and destination locks
//! 3. open-workflow check, audit record opened
//! 4. subject lookup and conflict detection (fail-fast)
//! 5. subject creation under its lock
//! 6. transfer through a private work area and swap-in
//! 7. archive record persisted, event published, caches invalidated
//! 8. staging session removed, audit completed, locks released
//! 9. post-merge hooks and downstream triggers
//!
//! Steps 1 to 4 are shared with [`MergeEngine::validate`], which runs them
//! in collect mode.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use prearc_locks::{LockPolicy, LockRegistry, LockScope, LockToken, ShutdownSignal};
use prearc_services::{
    ArchiveEvent, ArchiveEventKind, AuditEntry, AuditLog, Dispatcher, DownstreamTrigger,
    EventSink, MergeHook, MergeSummary, PermissionChecker, ServiceError, Target,
};
use prearc_staging::SessionCatalog;
use prearc_store::{
    ArchiveStore, ArchivedSession, ProjectRecord, QuarantineCode, ScanRecord, StagingStore,
    StoreError,
};
use prearc_types::{
    ErrorCategory, Notice, NoticeCode, SessionLocator, SessionStatus, StagingSession,
};

use crate::conflict::{detect_conflicts, ConflictPolicy, Incoming};
use crate::error::{MergeError, MergeResult};
use crate::label::{resolve_label, LabelPlugin};
use crate::reporter::{ReportMode, Reporter};
use crate::request::{ArchiveRequest, MergeOutcome, MergeSettings};
use crate::scan_ids::ScanPlan;
use crate::subject::{ensure_subject, lookup_subject, SubjectPlan};
use crate::transfer::{swap_out, transfer, WorkArea};

/// Collaborators the engine works with.
#[derive(Clone)]
pub struct MergeServices {
    pub staging: Arc<dyn StagingStore>,
    pub archive: Arc<dyn ArchiveStore>,
    pub locks: Arc<dyn LockRegistry>,
    pub lock_policy: LockPolicy,
    pub shutdown: ShutdownSignal,
    pub permissions: Arc<dyn PermissionChecker>,
    pub audit: Arc<dyn AuditLog>,
    pub events: Arc<dyn EventSink>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

/// How the duplicate-attempt check treats locks.
pub(crate) enum Locking<'a> {
    /// Take the tokens; a held token ends the run.
    Acquire(&'a mut LockScope),
    /// Only look at the registry.
    Probe,
}

/// Everything the checks before conflict detection established.
#[derive(Debug)]
pub(crate) struct Preflight {
    pub session: StagingSession,
    pub catalog: SessionCatalog,
    pub project: ProjectRecord,
    pub label: String,
    pub destination: Option<ArchivedSession>,
    pub dest_dir: PathBuf,
    /// Known destination id: the existing session's, or the requested one.
    pub session_id: Option<String>,
}

pub struct MergeEngine {
    services: MergeServices,
    settings: MergeSettings,
    label_plugin: Option<Arc<dyn LabelPlugin>>,
    hooks: Vec<Arc<dyn MergeHook>>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl MergeEngine {
    pub fn new(services: MergeServices, settings: MergeSettings) -> Self {
        Self {
            services,
            settings,
            label_plugin: None,
            hooks: Vec::new(),
        }
    }

    pub fn with_label_plugin(mut self, plugin: Arc<dyn LabelPlugin>) -> Self {
        self.label_plugin = Some(plugin);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn MergeHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    pub fn services(&self) -> &MergeServices {
        &self.services
    }

    fn scope(&self) -> LockScope {
        LockScope::new(
            self.services.locks.clone(),
            self.services.lock_policy.clone(),
            self.services.shutdown.clone(),
        )
    }

    /// Archive a staging session.
    ///
    /// Fails fast: the first blocking finding is returned as an error and no
    /// file is moved. Locks are released on every path.
    pub fn archive(&self, request: &ArchiveRequest) -> MergeResult<MergeOutcome> {
        let span = info_span!("archive", session = %request.session, principal = %request.principal);
        let _guard = span.enter();

        let mut scope = self.scope();
        let mut reporter = Reporter::fail_fast();
        let Some(pre) = self.preflight(request, &mut reporter, Locking::Acquire(&mut scope))? else {
            return Err(MergeError::Conflict(reporter.finish()));
        };

        let session_id = match &pre.session_id {
            Some(id) => id.clone(),
            None => self.services.archive.mint_session_id()?,
        };
        scope.try_acquire(LockToken::destination(&session_id))?;

        if pre.session.status != SessionStatus::InProgress {
            // Writers check the status under the same lock before cataloging.
            let catalog_token = LockToken::catalog(&pre.session.session_dir());
            scope.acquire(catalog_token.clone())?;
            let moved = self
                .services
                .staging
                .transition(&pre.session.locator(), SessionStatus::InProgress);
            scope.release(&catalog_token)?;
            moved?;
        }

        let mut entry = AuditEntry::new(&request.principal.name, &session_id, "archive");
        entry.category = request.params.category;
        if let Some(j) = &request.params.justification {
            entry.justification = j.clone();
        }
        let audit_id = match self.services.audit.open(entry) {
            Ok(id) => id,
            Err(e) => {
                self.settle_status(&pre.session.locator(), ErrorCategory::Fatal);
                return Err(e.into());
            }
        };

        let result = self.merge_locked(request, &pre, &session_id, audit_id, &mut scope, &mut reporter);
        match &result {
            Ok(_) => {
                if let Err(e) = self.services.audit.complete(audit_id) {
                    warn!(audit = %audit_id, error = %e, "could not complete audit record");
                }
            }
            Err(e) => {
                if let Err(audit_err) = self.services.audit.fail(audit_id, &e.to_string()) {
                    warn!(audit = %audit_id, error = %audit_err, "could not fail audit record");
                }
                self.settle_status(&pre.session.locator(), e.category());
            }
        }
        if let Err(e) = scope.release_all() {
            warn!(error = %e, "could not release merge locks");
        }

        let outcome = result?;
        self.after_merge(request, &outcome);
        Ok(outcome)
    }

    /// Steps 4 to 8, with every lock held.
    fn merge_locked(
        &self,
        request: &ArchiveRequest,
        pre: &Preflight,
        session_id: &str,
        audit_id: Uuid,
        scope: &mut LockScope,
        reporter: &mut Reporter,
    ) -> MergeResult<MergeOutcome> {
        let Some((subject_plan, plan)) = self.plan(request, pre, reporter)? else {
            return Err(MergeError::Conflict(reporter.clone().finish()));
        };

        let subject = match subject_plan {
            SubjectPlan::Existing(s) => s,
            SubjectPlan::Create { project, label } => ensure_subject(
                self.services.archive.as_ref(),
                scope,
                &project,
                &label,
                self.settings.subject_retry_delay,
            )?,
        };
        self.audit_step(audit_id, &format!("subject {}", subject.id));

        let work = WorkArea::create(&self.settings.archive_root, &self.settings.failed_root, session_id)?;
        let catalog = match transfer(scope, &work, &pre.session.session_dir(), &pre.dest_dir, &plan) {
            Ok(c) => c,
            Err(e) => {
                self.park(work);
                return Err(e);
            }
        };
        self.audit_step(audit_id, &format!("transferred {} file(s)", catalog.entries.len()));

        let record = self.merged_record(request, pre, session_id, &subject.id, &catalog);
        if let Err(e) = self.services.archive.save_session(&record) {
            if let Err(undo) = swap_out(&work, &pre.dest_dir) {
                warn!(dest = %pre.dest_dir.display(), error = %undo, "could not restore destination");
            }
            self.park(work);
            return Err(e.into());
        }

        let created = pre.destination.is_none();
        let event = ArchiveEvent {
            kind: if created {
                ArchiveEventKind::Created
            } else {
                ArchiveEventKind::Updated
            },
            project: record.project.clone(),
            session_id: record.id.clone(),
            label: record.label.clone(),
        };
        if let Err(e) = self.services.events.publish(&event) {
            warn!(session_id, error = %e, "could not publish archive event");
        }
        if let Err(e) = self.services.events.invalidate(&record.project, &record.id) {
            warn!(session_id, error = %e, "could not invalidate caches");
        }

        if let Err(e) = self.remove_staging(&pre.session) {
            self.park(work);
            return Err(e);
        }
        if let Err(e) = work.discard() {
            warn!(error = %e, "could not remove merge work area");
        }

        info!(
            session_id,
            project = %record.project,
            label = %record.label,
            created,
            scans = record.scans.len(),
            quarantined = record.quarantined,
            "session archived"
        );
        Ok(MergeOutcome {
            project: record.project,
            session_id: record.id,
            label: record.label,
            subject_id: record.subject_id,
            created,
            path: record.path,
            scans: record.scans.len(),
            quarantined: record.quarantined,
            warnings: reporter.clone().finish(),
        })
    }

    /// Checks that precede conflict detection, in order: permission, label,
    /// project, duplicate attempt, empty session, destination directory,
    /// destination locks, open workflow.
    ///
    /// Returns `None` when a later check cannot run: the destination
    /// directory is unknown (collect mode), or an earlier finding left no
    /// project or label to look it up with.
    pub(crate) fn preflight(
        &self,
        request: &ArchiveRequest,
        reporter: &mut Reporter,
        mut locking: Locking<'_>,
    ) -> MergeResult<Option<Preflight>> {
        let session = self
            .services
            .staging
            .get(&request.session)?
            .ok_or_else(|| MergeError::SessionNotFound(request.session.clone()))?;
        let catalog = SessionCatalog::load(&session.session_dir())?;
        let params = &request.params;

        if let Some(project) = &session.project {
            let target = Target::Project(project.clone());
            if !self.services.permissions.can_edit(&request.principal, &target)? {
                reporter.failure(
                    Notice::failure(
                        NoticeCode::Forbidden,
                        format!("{} may not archive into {project}", request.principal),
                    ),
                    || {
                        ServiceError::Forbidden {
                            principal: request.principal.name.clone(),
                            action: format!("archive into {target}"),
                        }
                        .into()
                    },
                )?;
            }
        }

        let plugin = self.label_plugin.as_deref();
        let label = match resolve_label(params, plugin, &session, &catalog) {
            Ok(label) => Some(label),
            Err(e @ MergeError::InvalidLabel { .. }) => {
                reporter.failure(Notice::failure(NoticeCode::InvalidLabel, e.to_string()), || e)?;
                None
            }
            Err(e) => return Err(e),
        };

        let project = match &session.project {
            Some(id) => self.services.archive.project(id)?,
            None => None,
        };
        if project.is_none() {
            let name = session.project_dir().to_string();
            reporter.failure(
                Notice::failure(NoticeCode::ProjectNotFound, format!("project {name} does not exist")),
                || MergeError::ProjectNotFound(name.clone()),
            )?;
        }

        let mut tokens = vec![LockToken::staging(&session.locator())];
        if let Some(id) = &params.destination_id {
            tokens.push(LockToken::destination(id));
        }
        self.check_locks(tokens, reporter, &mut locking)?;

        if catalog.entries.is_empty() {
            reporter.failure(
                Notice::failure(NoticeCode::EmptySession, format!("{} holds no files", session.locator())),
                || MergeError::EmptySession(session.locator()),
            )?;
        }

        let (Some(project), Some(label)) = (project, label) else {
            return Ok(None);
        };

        let destination = match &params.destination_id {
            Some(id) => self.services.archive.session_by_id(id)?,
            None => self.services.archive.find_session(&project.id, &label)?,
        };
        let dest_dir = match &destination {
            Some(d) => d.path.clone(),
            None => match self.services.archive.resolve_session_dir(&project.id, &label) {
                Ok(dir) => dir,
                Err(e) if reporter.mode() == ReportMode::Collect => {
                    debug!(error = %e, "destination directory unknown; stopping checks");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            },
        };
        let session_id = destination
            .as_ref()
            .map(|d| d.id.clone())
            .or_else(|| params.destination_id.clone());

        let mut tokens = vec![LockToken::destination_label(&project.id, &label)];
        if let Some(id) = &session_id {
            tokens.push(LockToken::destination(id));
        }
        self.check_locks(tokens, reporter, &mut locking)?;

        if let Some(id) = &session_id {
            if !params.override_open_workflow && self.services.audit.has_open(id)? {
                reporter.failure(
                    Notice::failure(NoticeCode::OpenWorkflow, format!("an open workflow exists on {id}")),
                    || MergeError::OpenWorkflow(id.clone()),
                )?;
            }
        }

        Ok(Some(Preflight {
            session,
            catalog,
            project,
            label,
            destination,
            dest_dir,
            session_id,
        }))
    }

    fn check_locks(
        &self,
        tokens: Vec<LockToken>,
        reporter: &mut Reporter,
        locking: &mut Locking<'_>,
    ) -> MergeResult<()> {
        for token in tokens {
            match locking {
                Locking::Acquire(scope) => scope.try_acquire(token)?,
                Locking::Probe => {
                    if self.services.locks.is_held(&token)? {
                        reporter.failure(
                            Notice::failure(
                                NoticeCode::ArchiveInProgress,
                                format!("an archive operation holds {token}"),
                            ),
                            || MergeError::DuplicateArchive { token: token.clone() },
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Subject lookup and conflict detection. `None` when no subject is
    /// available (collect mode only).
    pub(crate) fn plan(
        &self,
        request: &ArchiveRequest,
        pre: &Preflight,
        reporter: &mut Reporter,
    ) -> MergeResult<Option<(SubjectPlan, ScanPlan)>> {
        let params = &request.params;
        let identifier = params
            .subject
            .as_deref()
            .or(pre.session.subject.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let Some(identifier) = identifier else {
            reporter.failure(
                Notice::failure(NoticeCode::SubjectMod, format!("no subject given for {}", pre.session.locator())),
                || MergeError::MissingSubject(pre.session.locator()),
            )?;
            return Ok(None);
        };

        let subject = lookup_subject(self.services.archive.as_ref(), &pre.project.id, identifier)?;
        if let SubjectPlan::Create { project, label } = &subject {
            if params.allow_subject_create {
                reporter.warning(Notice::warning(
                    NoticeCode::SubjectCreated,
                    format!("subject {label} will be created in {project}"),
                ));
            } else {
                reporter.failure(
                    Notice::failure(
                        NoticeCode::SubjectCreated,
                        format!("subject {label} does not exist in {project} and may not be created"),
                    ),
                    || MergeError::SubjectNotFound {
                        project: project.clone(),
                        label: label.clone(),
                    },
                )?;
            }
        }

        let study_uid = Some(pre.session.study_instance_uid.as_str()).filter(|u| !u.is_empty());
        let same_uid = match (&pre.destination, study_uid) {
            (None, Some(uid)) => self
                .services
                .archive
                .sessions_by_study_uid(&pre.project.id, uid)?,
            _ => Vec::new(),
        };
        let modality = pre
            .session
            .modality
            .as_deref()
            .or_else(|| pre.catalog.scans.iter().find_map(|s| s.modality.as_deref()));
        let incoming = Incoming {
            project: &pre.project.id,
            label: &pre.label,
            subject_id: subject.id(),
            subject_label: subject.label(),
            study_uid,
            modality,
            scans: &pre.catalog.scans,
        };
        let policy = ConflictPolicy {
            allow_merge: params.allow_merge,
            override_conflicts: params.override_conflicts,
            allow_cross_modality: self.settings.allow_cross_modality_merge,
            correct_scan_ids: self.settings.correct_scan_ids,
            require_unique_study_uid: self.settings.require_unique_study_uid,
            uid_check_opt_out: pre.project.uid_check_opt_out,
        };
        let plan = detect_conflicts(&incoming, pre.destination.as_ref(), &same_uid, &policy, reporter)?;
        Ok(Some((subject, plan)))
    }

    fn merged_record(
        &self,
        request: &ArchiveRequest,
        pre: &Preflight,
        session_id: &str,
        subject_id: &str,
        catalog: &SessionCatalog,
    ) -> ArchivedSession {
        let now = Utc::now();
        let scans = catalog
            .scans
            .iter()
            .map(|s| ScanRecord {
                id: s.id.clone(),
                series_instance_uid: s.series_instance_uid.clone(),
                modality: s.modality.clone(),
                description: s.description.clone(),
                file_count: catalog.entries_for_scan(&s.id).count(),
            })
            .collect();
        let quarantined = request
            .params
            .quarantine
            .unwrap_or(pre.project.quarantine_code == QuarantineCode::Quarantine);
        let session = &pre.session;
        match &pre.destination {
            Some(dest) => ArchivedSession {
                scans,
                quarantined,
                visit: dest.visit.clone().or_else(|| session.visit.clone()),
                last_modified: now,
                ..dest.clone()
            },
            None => ArchivedSession {
                id: session_id.to_string(),
                project: pre.project.id.clone(),
                subject_id: subject_id.to_string(),
                label: pre.label.clone(),
                study_instance_uid: Some(session.study_instance_uid.clone()).filter(|u| !u.is_empty()),
                modality: session
                    .modality
                    .clone()
                    .or_else(|| catalog.scans.iter().find_map(|s| s.modality.clone())),
                visit: session.visit.clone(),
                scans,
                quarantined,
                path: pre.dest_dir.clone(),
                created: now,
                last_modified: now,
            },
        }
    }

    /// Delete the staging record and directory, then prune empty timestamp
    /// and project directories.
    fn remove_staging(&self, session: &StagingSession) -> MergeResult<()> {
        let dir = session.session_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match self.services.staging.delete(&session.locator()) {
            Ok(_) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        let mut parent = dir.parent();
        for _ in 0..2 {
            let Some(p) = parent else { break };
            if fs::remove_dir(p).is_err() {
                break;
            }
            parent = p.parent();
        }
        debug!(session = %session.locator(), "staging session removed");
        Ok(())
    }

    fn park(&self, work: WorkArea) {
        if let Err(e) = work.quarantine() {
            warn!(error = %e, "could not move partial merge to failed area");
        }
    }

    fn audit_step(&self, id: Uuid, message: &str) {
        if let Err(e) = self.services.audit.step(id, message) {
            warn!(audit = %id, error = %e, "could not record audit step");
        }
    }

    /// Leave the staging session in `CONFLICT` or `FAILED` after an error.
    fn settle_status(&self, locator: &SessionLocator, category: ErrorCategory) {
        let status = if category == ErrorCategory::Conflict {
            SessionStatus::Conflict
        } else {
            SessionStatus::Failed
        };
        match self.services.staging.transition(locator, status) {
            Ok(_) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => warn!(session = %locator, error = %e, "could not record failed archive"),
        }
    }

    fn after_merge(&self, request: &ArchiveRequest, outcome: &MergeOutcome) {
        let summary = MergeSummary {
            project: outcome.project.clone(),
            session_id: outcome.session_id.clone(),
            label: outcome.label.clone(),
            created: outcome.created,
            scans: outcome.scans,
        };
        for hook in &self.hooks {
            if let Err(e) = hook.after_merge(&summary) {
                warn!(session_id = %outcome.session_id, error = %e, "post-merge hook failed");
            }
        }
        if request.params.suppress_triggers {
            debug!(session_id = %outcome.session_id, "downstream triggers suppressed");
            return;
        }
        let trigger = DownstreamTrigger {
            project: outcome.project.clone(),
            session_id: outcome.session_id.clone(),
            created: outcome.created,
        };
        if let Err(e) = self.services.dispatcher.trigger_downstream(&trigger) {
            warn!(session_id = %outcome.session_id, error = %e, "could not trigger downstream work");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::request::ArchiveParams;
    use prearc_locks::InMemoryLockRegistry;
    use prearc_services::{
        AllowAll, AuditStatus, InMemoryAuditLog, Principal, ProjectMembership,
        RecordingDispatcher, RecordingEventSink, ServiceResult,
    };
    use prearc_staging::{CatalogEntry, CatalogScan};
    use prearc_store::{InMemoryArchiveStore, InMemoryStagingStore};
    use prearc_types::NoticeKind;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub tmp: TempDir,
        pub staging: Arc<InMemoryStagingStore>,
        pub archive: Arc<InMemoryArchiveStore>,
        pub locks: Arc<InMemoryLockRegistry>,
        pub audit: Arc<InMemoryAuditLog>,
        pub events: Arc<RecordingEventSink>,
        pub dispatcher: Arc<RecordingDispatcher>,
        pub engine: MergeEngine,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_permissions(Arc::new(AllowAll))
        }

        pub fn with_permissions(permissions: Arc<dyn PermissionChecker>) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let archive_root = tmp.path().join("archive");
            let staging = Arc::new(InMemoryStagingStore::new());
            let archive = Arc::new(
                InMemoryArchiveStore::new(&archive_root, "SITE")
                    .with_project("P1")
                    .unwrap(),
            );
            let locks = Arc::new(InMemoryLockRegistry::new());
            let audit = Arc::new(InMemoryAuditLog::new());
            let events = Arc::new(RecordingEventSink::new());
            let dispatcher = Arc::new(RecordingDispatcher::new());
            let services = MergeServices {
                staging: staging.clone(),
                archive: archive.clone(),
                locks: locks.clone(),
                lock_policy: LockPolicy::default(),
                shutdown: ShutdownSignal::new(),
                permissions,
                audit: audit.clone(),
                events: events.clone(),
                dispatcher: dispatcher.clone(),
            };
            let settings = MergeSettings {
                archive_root,
                failed_root: tmp.path().join("failed"),
                subject_retry_delay: Duration::ZERO,
                ..MergeSettings::default()
            };
            Self {
                engine: MergeEngine::new(services, settings),
                tmp,
                staging,
                archive,
                locks,
                audit,
                events,
                dispatcher,
            }
        }

        /// A staging session in `project` with one file per `(scan, series uid)`.
        pub fn stage(
            &self,
            project: &str,
            folder: &str,
            study_uid: &str,
            subject: Option<&str>,
            scans: &[(&str, &str)],
        ) -> StagingSession {
            let mut candidate = StagingSession::new(
                Some(project.to_string()),
                folder,
                study_uid,
                self.tmp.path().join("prearchive"),
            );
            candidate.subject = subject.map(str::to_string);
            candidate.modality = Some("MR".into());
            let session = self.staging.find_or_create(candidate).unwrap().into_session();
            let dir = session.session_dir();
            let mut catalog = SessionCatalog::default();
            for (scan, uid) in scans {
                fs::create_dir_all(dir.join(scan)).unwrap();
                fs::write(dir.join(scan).join(format!("{scan}.dcm")), uid.as_bytes()).unwrap();
                catalog.ensure_scan(CatalogScan {
                    id: scan.to_string(),
                    series_instance_uid: Some(uid.to_string()),
                    modality: Some("MR".into()),
                    ..Default::default()
                });
                catalog.upsert(CatalogEntry {
                    uri: format!("{scan}/{scan}.dcm"),
                    scan: scan.to_string(),
                    sop_class_uid: "1.2.840.10008.5.1.4.1.1.4".into(),
                    sop_instance_uid: format!("{uid}.1"),
                    transfer_syntax: "1.2.840.10008.1.2.1".into(),
                    size: uid.len() as u64,
                    digest: "00".into(),
                });
            }
            catalog.save(&dir).unwrap();
            session
        }

        pub fn request(&self, session: &StagingSession, params: ArchiveParams) -> ArchiveRequest {
            ArchiveRequest::new(session.locator(), Principal::user("alice")).with_params(params)
        }

        pub fn status(&self, session: &StagingSession) -> Option<SessionStatus> {
            self.staging.get(&session.locator()).unwrap().map(|s| s.status)
        }
    }

    fn files_under(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() != std::ffi::OsStr::new("catalog.json"))
            .count()
    }

    fn merge() -> ArchiveParams {
        ArchiveParams {
            allow_merge: true,
            ..ArchiveParams::default()
        }
    }

    #[test]
    fn archives_new_session() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1"), ("2", "1.2.3.2")]);
        let outcome = fx.engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.label, "MR1");
        assert_eq!(outcome.scans, 2);
        assert_eq!(outcome.path, fx.tmp.path().join("archive/P1/arc001/MR1"));
        assert!(outcome.path.join("1/1.dcm").is_file());
        assert_eq!(outcome.warnings[0].code, NoticeCode::SubjectCreated);

        assert!(!s.session_dir().exists());
        assert!(!fx.tmp.path().join("prearchive/P1").exists());
        assert_eq!(fx.status(&s), None);

        let record = fx.archive.session_by_id(&outcome.session_id).unwrap().unwrap();
        assert_eq!(record.scans.len(), 2);
        assert_eq!(record.scans[0].file_count, 1);
        assert_eq!(fx.archive.find_subject("P1", "S1").unwrap().unwrap().id, record.subject_id);

        assert_eq!(fx.events.events().unwrap()[0].kind, ArchiveEventKind::Created);
        assert_eq!(fx.events.invalidated().unwrap(), vec![outcome.session_id.clone()]);
        assert_eq!(fx.dispatcher.triggers().unwrap().len(), 1);
        assert_eq!(fx.audit.records().unwrap()[0].status, AuditStatus::Complete);
        assert!(fx.locks.held().unwrap().is_empty());
        let work = fx.tmp.path().join("archive").join(crate::transfer::WORK_DIR);
        assert!(fs::read_dir(work).unwrap().next().is_none());
    }

    #[test]
    fn label_conflict_moves_nothing() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let archived = fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();

        let second = fx.stage("P1", "MR2", "1.2.3", Some("S1"), &[("4", "1.2.3.4")]);
        let params = ArchiveParams {
            destination_id: Some(archived.session_id.clone()),
            ..merge()
        };
        let err = fx.engine.archive(&fx.request(&second, params)).unwrap_err();

        assert_eq!(err.notices()[0].code, NoticeCode::LabelMod);
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(second.session_dir().join("4/4.dcm").is_file());
        assert_eq!(files_under(&archived.path), 1);
        assert_eq!(fx.status(&second), Some(SessionStatus::Conflict));
        let audit = fx.audit.records().unwrap();
        assert!(matches!(audit[1].status, AuditStatus::Failed(_)));
        assert!(fx.locks.held().unwrap().is_empty());
    }

    #[test]
    fn existing_destination_needs_merge_flag() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();
        let second = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("2", "1.2.3.2")]);
        let err = fx.engine.archive(&fx.request(&second, ArchiveParams::default())).unwrap_err();
        assert_eq!(err.notices()[0].code, NoticeCode::MergeNotAllowed);

        let outcome = fx.engine.archive(&fx.request(&second, merge())).unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.scans, 2);
        assert_eq!(fx.events.events().unwrap()[1].kind, ArchiveEventKind::Updated);
    }

    #[test]
    fn scan_number_is_corrected_by_uid() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("3", "1.2.3.3")]);
        let archived = fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();

        let second = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("2", "1.2.3.3")]);
        let outcome = fx.engine.archive(&fx.request(&second, merge())).unwrap();

        assert_eq!(outcome.scans, 1);
        assert!(outcome
            .warnings
            .iter()
            .any(|n| n.code == NoticeCode::ScanNumberConflict && n.kind == NoticeKind::Warning));
        assert!(archived.path.join("3/3.dcm").is_file());
        assert!(archived.path.join("3/2.dcm").is_file());
        assert!(!archived.path.join("2").exists());
        let record = fx.archive.session_by_id(&outcome.session_id).unwrap().unwrap();
        assert_eq!(record.scan("3").unwrap().file_count, 2);
    }

    #[test]
    fn colliding_scan_id_gets_synthesized() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("5", "1.2.3.5")]);
        let archived = fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();
        let second = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("5", "1.2.3.50")]);
        let outcome = fx.engine.archive(&fx.request(&second, merge())).unwrap();
        assert_eq!(outcome.scans, 2);
        assert!(archived.path.join("5-MR1/5.dcm").is_file());
    }

    #[test]
    fn held_staging_lock_rejects_duplicate_attempt() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let token = LockToken::staging(&s.locator());
        assert!(fx.locks.try_acquire(&token).unwrap());

        let err = fx.engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateArchive { .. }));
        assert!(s.session_dir().join("1/1.dcm").is_file());
        assert_eq!(fx.status(&s), Some(SessionStatus::Receiving));
        assert_eq!(fx.locks.held().unwrap(), vec![token]);
    }

    #[test]
    fn concurrent_archives_of_one_session() {
        let fx = Arc::new(Fixture::new());
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fx = fx.clone();
                let request = fx.request(&s, ArchiveParams::default());
                std::thread::spawn(move || fx.engine.archive(&request).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(fx.archive.sessions_by_study_uid("P1", "1.2.3").unwrap().len(), 1);
    }

    #[test]
    fn empty_session_is_rejected() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[]);
        let err = fx.engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap_err();
        assert!(matches!(err, MergeError::EmptySession(_)));
        assert!(fx.locks.held().unwrap().is_empty());
    }

    #[test]
    fn non_member_is_forbidden() {
        let fx = Fixture::with_permissions(Arc::new(ProjectMembership::new().grant("bob", "P1")));
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let err = fx.engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap_err();
        assert!(matches!(err, MergeError::Service(ServiceError::Forbidden { .. })));
        assert!(fx.audit.records().unwrap().is_empty());
    }

    #[test]
    fn subject_creation_can_be_refused() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S9"), &[("1", "1.2.3.1")]);
        let params = ArchiveParams {
            allow_subject_create: false,
            ..ArchiveParams::default()
        };
        let err = fx.engine.archive(&fx.request(&s, params)).unwrap_err();
        assert!(matches!(err, MergeError::SubjectNotFound { .. }));
        assert_eq!(fx.status(&s), Some(SessionStatus::Failed));
        assert!(fx.archive.find_subject("P1", "S9").unwrap().is_none());
    }

    #[test]
    fn open_workflow_blocks_unless_overridden() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let archived = fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();
        fx.audit
            .open(AuditEntry::new("bob", &archived.session_id, "edit"))
            .unwrap();

        let second = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("2", "1.2.3.2")]);
        let err = fx.engine.archive(&fx.request(&second, merge())).unwrap_err();
        assert!(matches!(err, MergeError::OpenWorkflow(_)));

        let params = ArchiveParams {
            override_open_workflow: true,
            ..merge()
        };
        fx.engine.archive(&fx.request(&second, params)).unwrap();
    }

    #[test]
    fn quarantine_follows_flag_then_project() {
        let fx = Fixture::new();
        let mut project = fx.archive.project("P1").unwrap().unwrap();
        project.quarantine_code = QuarantineCode::Quarantine;
        fx.archive.save_project(&project).unwrap();

        let a = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        assert!(fx.engine.archive(&fx.request(&a, ArchiveParams::default())).unwrap().quarantined);

        let b = fx.stage("P1", "MR2", "1.2.4", Some("S1"), &[("1", "1.2.4.1")]);
        let params = ArchiveParams {
            quarantine: Some(false),
            ..ArchiveParams::default()
        };
        assert!(!fx.engine.archive(&fx.request(&b, params)).unwrap().quarantined);
    }

    #[test]
    fn duplicate_study_uid_needs_override() {
        let fx = Fixture::new();
        let a = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        fx.engine.archive(&fx.request(&a, ArchiveParams::default())).unwrap();

        let b = fx.stage("P1", "MR9", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let err = fx.engine.archive(&fx.request(&b, ArchiveParams::default())).unwrap_err();
        assert_eq!(err.notices()[0].code, NoticeCode::DuplicateStudyUid);

        let params = ArchiveParams {
            override_conflicts: true,
            ..ArchiveParams::default()
        };
        let outcome = fx.engine.archive(&fx.request(&b, params)).unwrap();
        assert_eq!(outcome.label, "MR9");
    }

    struct FailingHook;

    impl MergeHook for FailingHook {
        fn after_merge(&self, _summary: &MergeSummary) -> ServiceResult<()> {
            Err(ServiceError::Hook("boom".into()))
        }
    }

    #[test]
    fn hook_failure_does_not_fail_archive() {
        let mut fx = Fixture::new();
        let services = fx.engine.services().clone();
        let settings = fx.engine.settings().clone();
        fx.engine = MergeEngine::new(services, settings).with_hook(Arc::new(FailingHook));
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        fx.engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap();
    }

    #[test]
    fn triggers_can_be_suppressed() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let params = ArchiveParams {
            suppress_triggers: true,
            ..ArchiveParams::default()
        };
        fx.engine.archive(&fx.request(&s, params)).unwrap();
        assert!(fx.dispatcher.triggers().unwrap().is_empty());
    }

    #[test]
    fn merging_keeps_archived_objects_that_share_a_file_name() {
        let fx = Fixture::new();
        let first = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let outcome = fx.engine.archive(&fx.request(&first, ArchiveParams::default())).unwrap();

        let second = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let dir = second.session_dir();
        let mut catalog = SessionCatalog::load(&dir).unwrap();
        catalog.entries[0].sop_instance_uid = "1.2.3.1.2".into();
        catalog.save(&dir).unwrap();
        fs::write(dir.join("1/1.dcm"), b"second").unwrap();

        fx.engine.archive(&fx.request(&second, merge())).unwrap();
        assert_eq!(fs::read(outcome.path.join("1/1.dcm")).unwrap(), b"1.2.3.1");
        assert_eq!(fs::read(outcome.path.join("1/1-1.dcm")).unwrap(), b"second");
        let merged = SessionCatalog::load(&outcome.path).unwrap();
        let mut instances: Vec<_> = merged.entries.iter().map(|e| e.sop_instance_uid.as_str()).collect();
        instances.sort();
        assert_eq!(instances, ["1.2.3.1.1", "1.2.3.1.2"]);
    }

    /// Staging store whose records cannot be deleted.
    struct Undeletable(Arc<InMemoryStagingStore>);

    impl StagingStore for Undeletable {
        fn find_or_create(&self, candidate: StagingSession) -> prearc_store::StoreResult<prearc_store::Resolved> {
            self.0.find_or_create(candidate)
        }
        fn get(&self, locator: &SessionLocator) -> prearc_store::StoreResult<Option<StagingSession>> {
            self.0.get(locator)
        }
        fn find_by_key(&self, key: &prearc_types::SessionKey) -> prearc_store::StoreResult<Vec<StagingSession>> {
            self.0.find_by_key(key)
        }
        fn update(&self, session: &StagingSession) -> prearc_store::StoreResult<()> {
            self.0.update(session)
        }
        fn delete(&self, _locator: &SessionLocator) -> prearc_store::StoreResult<bool> {
            Err(StoreError::Transient("record store offline".into()))
        }
        fn list(&self, project: Option<&str>) -> prearc_store::StoreResult<Vec<StagingSession>> {
            self.0.list(project)
        }
        fn transition(
            &self,
            locator: &SessionLocator,
            to: SessionStatus,
        ) -> prearc_store::StoreResult<StagingSession> {
            self.0.transition(locator, to)
        }
        fn touch(
            &self,
            locator: &SessionLocator,
            now: chrono::DateTime<Utc>,
            min_interval: chrono::Duration,
        ) -> prearc_store::StoreResult<StagingSession> {
            self.0.touch(locator, now, min_interval)
        }
    }

    #[test]
    fn failed_staging_cleanup_parks_the_work_area() {
        let fx = Fixture::new();
        let s = fx.stage("P1", "MR1", "1.2.3", Some("S1"), &[("1", "1.2.3.1")]);
        let services = MergeServices {
            staging: Arc::new(Undeletable(fx.staging.clone())),
            ..fx.engine.services().clone()
        };
        let engine = MergeEngine::new(services, fx.engine.settings().clone());

        let err = engine.archive(&fx.request(&s, ArchiveParams::default())).unwrap_err();
        assert!(matches!(err, MergeError::Store(StoreError::Transient(_))));
        let work = fx.tmp.path().join("archive").join(crate::transfer::WORK_DIR);
        assert!(fs::read_dir(work).unwrap().next().is_none());
        assert_eq!(fs::read_dir(fx.tmp.path().join("failed")).unwrap().count(), 1);
        assert_eq!(fx.status(&s), Some(SessionStatus::Failed));
        assert!(fx.locks.held().unwrap().is_empty());
    }
}
