use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use prearc_dicom::{NativeTranscoder, Transcoder};
use prearc_locks::{InMemoryLockRegistry, LockRegistry, ShutdownSignal};
use prearc_merge::{ArchiveRequest, LabelPlugin, MergeEngine, MergeOutcome, MergeServices};
use prearc_services::{
    AllowAll, Anonymizer, AuditLog, Dispatcher, EventSink, InMemoryAuditLog, MergeHook,
    NoOpAnonymizer, NoOpDispatcher, NoOpEventSink, PermissionChecker, Principal,
};
use prearc_staging::{
    queue_operation, ImportOutcome, ImportReport, Importer, SessionResolver, StagingError,
    StorageWriter,
};
use prearc_store::{ArchiveStore, InMemoryArchiveStore, InMemoryStagingStore, StagingStore};
use prearc_types::{
    ImportUnit, Notice, Operation, RoutingOverrides, SessionLocator, SessionStatus, StagingSession,
};

use crate::config::SiteConfig;
use crate::error::{SdkError, SdkResult};

/// Result of an archive run under a deadline.
#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(MergeOutcome),
    Failed(SdkError),
    /// The deadline passed first. The merge keeps running in the background
    /// and its result is only visible through the stores.
    Inconclusive,
}

impl TriggerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Wires a [`Prearchive`] from a [`SiteConfig`]. Anything not supplied gets
/// an in-memory or no-op implementation.
pub struct PrearchiveBuilder {
    config: SiteConfig,
    staging: Option<Arc<dyn StagingStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
    locks: Option<Arc<dyn LockRegistry>>,
    permissions: Arc<dyn PermissionChecker>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventSink>,
    dispatcher: Arc<dyn Dispatcher>,
    anonymizer: Arc<dyn Anonymizer>,
    transcoder: Arc<dyn Transcoder>,
    label_plugin: Option<Arc<dyn LabelPlugin>>,
    hooks: Vec<Arc<dyn MergeHook>>,
    shutdown: ShutdownSignal,
}

impl PrearchiveBuilder {
    fn new(config: SiteConfig) -> Self {
        Self {
            config,
            staging: None,
            archive: None,
            locks: None,
            permissions: Arc::new(AllowAll),
            audit: Arc::new(InMemoryAuditLog::new()),
            events: Arc::new(NoOpEventSink),
            dispatcher: Arc::new(NoOpDispatcher),
            anonymizer: Arc::new(NoOpAnonymizer),
            transcoder: Arc::new(NativeTranscoder),
            label_plugin: None,
            hooks: Vec::new(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn staging_store(mut self, store: Arc<dyn StagingStore>) -> Self {
        self.staging = Some(store);
        self
    }

    pub fn archive_store(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(store);
        self
    }

    /// Share a lock registry between several instances.
    pub fn locks(mut self, locks: Arc<dyn LockRegistry>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn anonymizer(mut self, anonymizer: Arc<dyn Anonymizer>) -> Self {
        self.anonymizer = anonymizer;
        self
    }

    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn label_plugin(mut self, plugin: Arc<dyn LabelPlugin>) -> Self {
        self.label_plugin = Some(plugin);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn MergeHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Build the instance. Every configured project is written to the
    /// archive store.
    pub fn build(self) -> SdkResult<Prearchive> {
        let config = self.config;
        let staging = self
            .staging
            .unwrap_or_else(|| Arc::new(InMemoryStagingStore::new()));
        let archive = self.archive.unwrap_or_else(|| {
            Arc::new(InMemoryArchiveStore::new(&config.archive_root, &config.site_id))
        });
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(InMemoryLockRegistry::new()));
        for record in config.project_records() {
            archive.save_project(&record)?;
        }

        let mut resolver = SessionResolver::new(staging.clone(), config.resolver_settings());
        if config.direct_archive_root.is_some() {
            resolver = resolver.with_direct_store(Arc::new(InMemoryStagingStore::new()));
        }
        let writer = StorageWriter::new(
            locks.clone(),
            config.lock_policy(),
            self.shutdown.clone(),
            self.anonymizer,
            self.transcoder,
            config.writer_settings(),
        );
        let importer = Importer::new(
            config.build_filter()?,
            resolver,
            writer,
            self.permissions.clone(),
        );

        let services = MergeServices {
            staging: staging.clone(),
            archive: archive.clone(),
            locks,
            lock_policy: config.lock_policy(),
            shutdown: self.shutdown.clone(),
            permissions: self.permissions,
            audit: self.audit,
            events: self.events,
            dispatcher: self.dispatcher.clone(),
        };
        let mut engine = MergeEngine::new(services, config.merge_settings());
        if let Some(plugin) = self.label_plugin {
            engine = engine.with_label_plugin(plugin);
        }
        for hook in self.hooks {
            engine = engine.with_hook(hook);
        }

        info!(
            site = %config.site_id,
            prearchive = %config.prearchive_root.display(),
            archive = %config.archive_root.display(),
            projects = config.projects.len(),
            "prearchive ready"
        );
        Ok(Prearchive {
            config,
            staging,
            archive,
            importer,
            engine: Arc::new(engine),
            dispatcher: self.dispatcher,
            shutdown: self.shutdown,
        })
    }
}

/// Import, validate and archive against one site.
pub struct Prearchive {
    config: SiteConfig,
    staging: Arc<dyn StagingStore>,
    archive: Arc<dyn ArchiveStore>,
    importer: Importer,
    engine: Arc<MergeEngine>,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for Prearchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prearchive")
            .field("site", &self.config.site_id)
            .field("importer", &self.importer)
            .field("engine", &self.engine)
            .finish()
    }
}

impl Prearchive {
    /// An instance backed entirely by in-memory stores.
    pub fn open(config: SiteConfig) -> SdkResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SiteConfig) -> PrearchiveBuilder {
        PrearchiveBuilder::new(config)
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn staging_store(&self) -> &Arc<dyn StagingStore> {
        &self.staging
    }

    pub fn archive_store(&self) -> &Arc<dyn ArchiveStore> {
        &self.archive
    }

    pub fn engine(&self) -> &Arc<MergeEngine> {
        &self.engine
    }

    /// Interrupt lock waits in progress; they fail instead of retrying.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    // ---- Import ----

    pub fn import_bytes(
        &self,
        principal: &Principal,
        name: Option<String>,
        data: Vec<u8>,
        overrides: &RoutingOverrides,
    ) -> SdkResult<ImportOutcome> {
        let unit = ImportUnit::new(name, data, overrides.clone());
        Ok(self.importer.import_object(principal, &unit)?)
    }

    /// Import a file, zip archive or directory tree, then queue archives for
    /// sessions of auto-archiving projects.
    pub fn import_path(
        &self,
        principal: &Principal,
        path: &Path,
        overrides: &RoutingOverrides,
    ) -> SdkResult<ImportReport> {
        let report = self.importer.import_path(principal, path, overrides)?;
        self.queue_auto_archives(principal, &report.sessions)?;
        Ok(report)
    }

    /// Import every entry below the configured inbox.
    pub fn import_inbox(&self, principal: &Principal) -> SdkResult<ImportReport> {
        let inbox = self.config.inbox_path.clone();
        self.import_path(principal, &inbox, &RoutingOverrides::default())
    }

    /// Queue an archive for each given session whose project archives
    /// automatically. Returns the sessions that were queued.
    pub fn queue_auto_archives<'a>(
        &self,
        principal: &Principal,
        sessions: impl IntoIterator<Item = &'a SessionLocator>,
    ) -> SdkResult<Vec<SessionLocator>> {
        let mut queued = Vec::new();
        for locator in sessions {
            let Some(session) = self.staging.get(locator)? else {
                continue;
            };
            if self.archives_automatically(&session) {
                self.queue_auto_archive(principal, locator, &mut queued);
            }
        }
        Ok(queued)
    }

    /// Queue archives for auto-archiving sessions that received nothing for
    /// `auto_archive_idle_secs`. Single-object imports never queue; this is
    /// their trigger, run periodically by the host.
    pub fn queue_idle_archives(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> SdkResult<Vec<SessionLocator>> {
        let idle = self.config.auto_archive_idle();
        let mut queued = Vec::new();
        for session in self.staging.list(None)? {
            if now - session.last_modified < idle || !self.archives_automatically(&session) {
                continue;
            }
            self.queue_auto_archive(principal, &session.locator(), &mut queued);
        }
        if !queued.is_empty() {
            info!(count = queued.len(), "idle sessions queued for archiving");
        }
        Ok(queued)
    }

    fn archives_automatically(&self, session: &StagingSession) -> bool {
        session
            .project
            .as_deref()
            .and_then(|p| self.config.project(p))
            .is_some_and(|p| p.auto_archive)
            && !session.prevent_auto_commit
            && session.status.accepts_objects()
    }

    fn queue_auto_archive(
        &self,
        principal: &Principal,
        locator: &SessionLocator,
        queued: &mut Vec<SessionLocator>,
    ) {
        match self.queue(principal, locator, Operation::Archive, BTreeMap::new()) {
            Ok(_) => queued.push(locator.clone()),
            Err(SdkError::Staging(StagingError::AlreadyQueued { .. })) => {
                debug!(session = %locator, "archive already queued");
            }
            Err(e) => warn!(session = %locator, error = %e, "auto-archive not queued"),
        }
    }

    // ---- Sessions ----

    pub fn sessions(&self, project: Option<&str>) -> SdkResult<Vec<StagingSession>> {
        Ok(self.staging.list(project)?)
    }

    pub fn session(&self, locator: &SessionLocator) -> SdkResult<Option<StagingSession>> {
        Ok(self.staging.get(locator)?)
    }

    pub fn queue(
        &self,
        principal: &Principal,
        locator: &SessionLocator,
        operation: Operation,
        params: BTreeMap<String, String>,
    ) -> SdkResult<SessionStatus> {
        Ok(queue_operation(
            self.staging.as_ref(),
            self.dispatcher.as_ref(),
            principal,
            locator,
            operation,
            params,
        )?)
    }

    // ---- Archive ----

    pub fn validate(&self, request: &ArchiveRequest) -> SdkResult<Vec<Notice>> {
        Ok(self.engine.validate(request)?)
    }

    pub fn archive(&self, request: &ArchiveRequest) -> SdkResult<MergeOutcome> {
        Ok(self.engine.archive(request)?)
    }

    /// Archive on a blocking task, waiting at most `archive_timeout_secs`.
    pub async fn archive_with_timeout(&self, request: ArchiveRequest) -> TriggerOutcome {
        let deadline = self.config.archive_timeout();
        let engine = Arc::clone(&self.engine);
        let session = request.session.clone();
        let task = tokio::task::spawn_blocking(move || engine.archive(&request));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(Ok(outcome))) => TriggerOutcome::Completed(outcome),
            Ok(Ok(Err(e))) => TriggerOutcome::Failed(e.into()),
            Ok(Err(join)) => TriggerOutcome::Failed(SdkError::Task(join.to_string())),
            Err(_) => {
                warn!(session = %session, timeout_secs = deadline.as_secs(), "archive still running at deadline");
                TriggerOutcome::Inconclusive
            }
        }
    }
}
