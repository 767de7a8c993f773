//! Collision-safe storage of object bytes under a session directory.
//!
//! Layout: `<session dir>/<scan>/<filename>`. A `(scan, filename)` pair is
//! written by at most one caller at a time; a second concurrent writer is
//! rejected with [`StagingError::ConcurrentWrite`], not queued.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use prearc_dicom::{ObjectInfo, Transcoder, TransferSyntax};
use prearc_locks::{LockError, LockPolicy, LockRegistry, LockScope, LockToken, ShutdownSignal};
use prearc_services::{AnonymizationRequest, Anonymizer};
use prearc_store::{Resolved, StagingStore};
use prearc_types::{RoutingOverrides, SessionStatus, StagingSession};

use crate::catalog::{update_catalog, CatalogEntry, CatalogScan, SessionCatalog};
use crate::error::{StagingError, StagingResult};
use crate::naming::{choose_file_name, name_is_free_or_same, scan_id_for, NameChoice};

/// Attempts to claim a file name before giving up as a concurrent write.
const MAX_NAME_CLAIMS: usize = 4;

#[derive(Clone, Debug, Default)]
pub struct WriterSettings {
    /// Site-wide anonymization switch.
    pub anonymize: bool,
    /// Re-encode objects into `target_syntax` before storing.
    pub decompress_on_write: bool,
    pub target_syntax: TransferSyntax,
}

/// Where an object ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub session: StagingSession,
    pub scan: String,
    pub file_name: String,
    pub path: PathBuf,
    pub name_choice: NameChoice,
    /// Transfer syntax of the stored bytes.
    pub transfer_syntax: TransferSyntax,
    pub size: u64,
    pub digest: String,
    /// This write created the session.
    pub created_session: bool,
}

impl StoredObject {
    pub fn uri(&self) -> String {
        format!("{}/{}", self.scan, self.file_name)
    }
}

pub struct StorageWriter {
    locks: Arc<dyn LockRegistry>,
    policy: LockPolicy,
    shutdown: ShutdownSignal,
    anonymizer: Arc<dyn Anonymizer>,
    transcoder: Arc<dyn Transcoder>,
    settings: WriterSettings,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter")
            .field("settings", &self.settings)
            .finish()
    }
}

impl StorageWriter {
    pub fn new(
        locks: Arc<dyn LockRegistry>,
        policy: LockPolicy,
        shutdown: ShutdownSignal,
        anonymizer: Arc<dyn Anonymizer>,
        transcoder: Arc<dyn Transcoder>,
        settings: WriterSettings,
    ) -> Self {
        Self {
            locks,
            policy,
            shutdown,
            anonymizer,
            transcoder,
            settings,
        }
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Store one object in its resolved session.
    ///
    /// `store` must be the store that owns the session; it is used to delete
    /// the record again when this call created the session and the write
    /// failed before anything else landed in it.
    pub fn write(
        &self,
        store: &dyn StagingStore,
        resolved: &Resolved,
        info: &ObjectInfo,
        data: &[u8],
        original_name: Option<&str>,
        overrides: &RoutingOverrides,
    ) -> StagingResult<StoredObject> {
        let session = resolved.session();
        let session_dir = session.session_dir();
        let scan = scan_id_for(info);

        let mut scope =
            LockScope::new(self.locks.clone(), self.policy.clone(), self.shutdown.clone());
        let (file_name, name_choice) = self.claim_name(
            &mut scope,
            session,
            &scan,
            info,
            original_name,
            overrides.force_rename,
        )?;

        let path = session_dir.join(&scan).join(&file_name);
        let result = self.write_locked(&mut scope, store, session, info, data, &scan, &file_name, &path, overrides);
        match result {
            Ok((transfer_syntax, size, digest)) => {
                debug!(session = %session.locator(), uri = %format!("{scan}/{file_name}"), size, "object stored");
                Ok(StoredObject {
                    session: session.clone(),
                    scan,
                    file_name,
                    path,
                    name_choice,
                    transfer_syntax,
                    size,
                    digest,
                    created_session: resolved.is_created(),
                })
            }
            Err(e) => {
                let uri = format!("{scan}/{file_name}");
                let session_removed = self.roll_back(&mut scope, store, resolved, &uri, &path);
                Err(match e {
                    StagingError::Anonymization { file, message, .. } => {
                        StagingError::Anonymization {
                            file,
                            message,
                            session_removed,
                        }
                    }
                    other => other,
                })
            }
        }
    }

    /// Choose a file name and take its `(scan, filename)` lock. The name is
    /// checked again under the lock; one taken by a different object in the
    /// meantime is chosen afresh.
    fn claim_name(
        &self,
        scope: &mut LockScope,
        session: &StagingSession,
        scan: &str,
        info: &ObjectInfo,
        original_name: Option<&str>,
        force_rename: bool,
    ) -> StagingResult<(String, NameChoice)> {
        let session_dir = session.session_dir();
        let mut file_name = String::new();
        for _ in 0..MAX_NAME_CLAIMS {
            let catalog = SessionCatalog::load(&session_dir)?;
            let (name, choice) =
                choose_file_name(&session_dir, &catalog, scan, original_name, info, force_rename);
            let token = LockToken::scan_file(&session_dir, scan, &name);
            match scope.try_acquire(token.clone()) {
                Ok(()) => {}
                Err(LockError::Contended { .. }) => {
                    warn!(session = %session.locator(), scan, file = %name, "concurrent write rejected");
                    return Err(StagingError::ConcurrentWrite {
                        session: session.locator(),
                        scan: scan.to_string(),
                        file: name,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            let catalog = SessionCatalog::load(&session_dir)?;
            if name_is_free_or_same(&session_dir, &catalog, scan, &name, info) {
                return Ok((name, choice));
            }
            debug!(session = %session.locator(), scan, file = %name, "name taken while locking");
            scope.release(&token)?;
            file_name = name;
        }
        Err(StagingError::ConcurrentWrite {
            session: session.locator(),
            scan: scan.to_string(),
            file: file_name,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_locked(
        &self,
        scope: &mut LockScope,
        store: &dyn StagingStore,
        session: &StagingSession,
        info: &ObjectInfo,
        data: &[u8],
        scan: &str,
        file_name: &str,
        path: &Path,
        overrides: &RoutingOverrides,
    ) -> StagingResult<(TransferSyntax, u64, String)> {
        let (bytes, transfer_syntax) = self.encode(info, data);

        let scan_dir = path.parent().unwrap_or(path);
        fs::create_dir_all(scan_dir)?;
        let mut tmp = NamedTempFile::new_in(scan_dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;

        if self.settings.anonymize && !overrides.pre_anonymized && !session.prevent_anonymization {
            let request = AnonymizationRequest {
                file: path,
                project: session.project.as_deref(),
                subject: session.subject.as_deref(),
                session: &session.label,
            };
            if let Err(e) = self.anonymizer.anonymize(&request) {
                warn!(file = %path.display(), error = %e, "anonymization failed");
                return Err(StagingError::Anonymization {
                    file: path.to_path_buf(),
                    message: e.to_string(),
                    session_removed: false,
                });
            }
        }

        // Anonymization may have rewritten the file.
        let stored = fs::read(path)?;
        let size = stored.len() as u64;
        let digest = blake3::hash(&stored).to_hex().to_string();

        let session_dir = session.session_dir();
        let entry = CatalogEntry {
            uri: format!("{scan}/{file_name}"),
            scan: scan.to_string(),
            sop_class_uid: info.sop_class_uid.clone(),
            sop_instance_uid: info.sop_instance_uid.clone(),
            transfer_syntax: transfer_syntax.uid().to_string(),
            size,
            digest: digest.clone(),
        };
        let catalog_scan = CatalogScan {
            id: scan.to_string(),
            series_instance_uid: info.series_instance_uid.clone(),
            series_number: info.series_number,
            modality: info.modality.clone(),
            description: info.series_description.clone(),
        };
        // An archive copies the session once it is in progress; the status
        // is read under the catalog lock the archive takes for that change.
        let locator = session.locator();
        update_catalog(scope, &session_dir, move |catalog| {
            let status = store
                .get(&locator)?
                .map(|s| s.status)
                .ok_or_else(|| StagingError::SessionNotFound(locator.clone()))?;
            if !accepts_writes(status) {
                return Err(StagingError::SessionClosed {
                    session: locator,
                    status,
                });
            }
            catalog.ensure_scan(catalog_scan);
            catalog.upsert(entry);
            Ok(())
        })?;
        Ok((transfer_syntax, size, digest))
    }

    /// Best-effort re-encoding; the original bytes are stored on failure.
    fn encode<'a>(&self, info: &ObjectInfo, data: &'a [u8]) -> (Cow<'a, [u8]>, TransferSyntax) {
        let target = &self.settings.target_syntax;
        if !self.settings.decompress_on_write || &info.transfer_syntax == target {
            return (Cow::Borrowed(data), info.transfer_syntax.clone());
        }
        match self.transcoder.transcode(data, target) {
            Ok(bytes) => (Cow::Owned(bytes), target.clone()),
            Err(e) => {
                warn!(
                    instance = %info.sop_instance_uid,
                    from = %info.transfer_syntax,
                    to = %target,
                    error = %e,
                    "transcode failed, storing original syntax"
                );
                (Cow::Borrowed(data), info.transfer_syntax.clone())
            }
        }
    }

    /// Remove the written file and its catalog entry. A session created by
    /// this call is removed too when nothing else was cataloged in it.
    /// Returns whether the session was removed.
    fn roll_back(
        &self,
        scope: &mut LockScope,
        store: &dyn StagingStore,
        resolved: &Resolved,
        uri: &str,
        path: &Path,
    ) -> bool {
        let session = resolved.session();
        let session_dir = session.session_dir();
        let catalog_token = LockToken::catalog(&session_dir);
        if let Err(e) = scope.acquire(catalog_token.clone()) {
            warn!(token = %catalog_token, error = %e, "rollback could not lock catalog");
            return false;
        }

        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %path.display(), error = %e, "could not remove failed write");
            }
        }
        let remaining = match SessionCatalog::load(&session_dir) {
            Ok(mut catalog) => {
                if catalog.remove(uri).is_some() {
                    if let Err(e) = catalog.save(&session_dir) {
                        warn!(dir = %session_dir.display(), error = %e, "could not save catalog");
                    }
                }
                Some(catalog.entries.len())
            }
            Err(e) => {
                warn!(dir = %session_dir.display(), error = %e, "could not load catalog");
                None
            }
        };

        let removed = resolved.is_created()
            && remaining == Some(0)
            && remove_session(store, session, &session_dir);
        if let Err(e) = scope.release(&catalog_token) {
            warn!(token = %catalog_token, error = %e, "catalog lock release failed");
        }
        removed
    }
}

/// Sessions being archived (or already archived) take no more files.
fn accepts_writes(status: SessionStatus) -> bool {
    !matches!(status, SessionStatus::InProgress | SessionStatus::Complete)
}

fn remove_session(store: &dyn StagingStore, session: &StagingSession, session_dir: &Path) -> bool {
    match store.delete(&session.locator()) {
        Ok(_) => {}
        Err(e) => {
            warn!(session = %session.locator(), error = %e, "could not delete session record");
            return false;
        }
    }
    if let Err(e) = fs::remove_dir_all(session_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %session_dir.display(), error = %e, "could not remove session directory");
        }
    }
    // Drop the timestamp directory if this session was its only child.
    if let Some(parent) = session_dir.parent() {
        let _ = fs::remove_dir(parent);
    }
    info!(session = %session.locator(), "rolled back new session");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use prearc_dicom::{parse_object, DatasetBuilder, NativeTranscoder};
    use prearc_locks::{InMemoryLockRegistry, LockClass, LockResult};
    use prearc_services::{NoOpAnonymizer, ServiceError, ServiceResult};
    use prearc_store::InMemoryStagingStore;
    use std::io::Cursor;
    use std::sync::Mutex;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Runs `hook` right before the first file lock is taken, standing in
    /// for another writer that finishes in between.
    struct Interleaving {
        inner: Arc<InMemoryLockRegistry>,
        hook: Mutex<Option<Hook>>,
    }

    impl LockRegistry for Interleaving {
        fn try_acquire(&self, token: &LockToken) -> LockResult<bool> {
            if token.class() == LockClass::ScanFile {
                if let Some(hook) = self.hook.lock().unwrap().take() {
                    hook();
                }
            }
            self.inner.try_acquire(token)
        }

        fn release(&self, token: &LockToken) -> LockResult<bool> {
            self.inner.release(token)
        }

        fn is_held(&self, token: &LockToken) -> LockResult<bool> {
            self.inner.is_held(token)
        }

        fn held(&self) -> LockResult<Vec<LockToken>> {
            self.inner.held()
        }
    }

    struct Failing;

    impl Anonymizer for Failing {
        fn anonymize(&self, _request: &AnonymizationRequest<'_>) -> ServiceResult<()> {
            Err(ServiceError::Anonymization("script error".into()))
        }
    }

    /// Appends a marker so tests can see the file was rewritten.
    struct Marking;

    impl Anonymizer for Marking {
        fn anonymize(&self, request: &AnonymizationRequest<'_>) -> ServiceResult<()> {
            let mut f = fs::OpenOptions::new()
                .append(true)
                .open(request.file)
                .map_err(|e| ServiceError::Anonymization(e.to_string()))?;
            f.write_all(b"ANON")
                .map_err(|e| ServiceError::Anonymization(e.to_string()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: InMemoryStagingStore,
        registry: Arc<InMemoryLockRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                root: dir.path().to_path_buf(),
                _dir: dir,
                store: InMemoryStagingStore::new(),
                registry: Arc::new(InMemoryLockRegistry::new()),
            }
        }

        fn writer(&self, anonymizer: Arc<dyn Anonymizer>, settings: WriterSettings) -> StorageWriter {
            StorageWriter::new(
                self.registry.clone(),
                LockPolicy::default(),
                ShutdownSignal::new(),
                anonymizer,
                Arc::new(NativeTranscoder),
                settings,
            )
        }

        fn resolve(&self) -> Resolved {
            let session = StagingSession::new(Some("P1".into()), "MR1", "1.2.3", self.root.clone());
            self.store.find_or_create(session).unwrap()
        }
    }

    fn object(instance: &str, ts: TransferSyntax) -> (Vec<u8>, ObjectInfo) {
        let bytes = DatasetBuilder::new()
            .transfer_syntax(ts)
            .sop("1.2.840.10008.5.1.4.1.1.4", instance)
            .study_uid("1.2.3")
            .series_uid("1.2.3.1")
            .series_number(4)
            .modality("MR")
            .build();
        let info = parse_object(&mut Cursor::new(bytes.as_slice())).unwrap();
        (bytes, info)
    }

    #[test]
    fn stores_under_scan_dir_and_catalogs() {
        let fx = Fixture::new();
        let writer = fx.writer(Arc::new(NoOpAnonymizer), WriterSettings::default());
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);

        let stored = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();
        assert_eq!(stored.uri(), "4/IM1");
        assert_eq!(fs::read(&stored.path).unwrap(), bytes);

        let catalog = SessionCatalog::load(&resolved.session().session_dir()).unwrap();
        assert_eq!(catalog.entries.len(), 1);
        assert_eq!(catalog.entries[0].digest, stored.digest);
        assert_eq!(catalog.scan("4").unwrap().modality.as_deref(), Some("MR"));
        assert!(fx.registry.held().unwrap().is_empty());
    }

    #[test]
    fn identical_resend_overwrites_in_place() {
        let fx = Fixture::new();
        let writer = fx.writer(Arc::new(NoOpAnonymizer), WriterSettings::default());
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        let overrides = RoutingOverrides::default();

        let a = writer.write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &overrides).unwrap();
        let b = writer.write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &overrides).unwrap();
        assert_eq!(a.path, b.path);
        let files = fs::read_dir(a.path.parent().unwrap()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn concurrent_writer_of_same_file_is_rejected() {
        let fx = Fixture::new();
        let writer = fx.writer(Arc::new(NoOpAnonymizer), WriterSettings::default());
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        let dir = resolved.session().session_dir();
        fx.registry
            .try_acquire(&LockToken::scan_file(&dir, "4", "IM1"))
            .unwrap();

        let err = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap_err();
        assert!(matches!(err, StagingError::ConcurrentWrite { ref file, .. } if file == "IM1"));
        // The session stays; the other writer is still working in it.
        assert!(fx.store.get(&resolved.session().locator()).unwrap().is_some());
    }

    #[test]
    fn name_taken_while_locking_is_chosen_again() {
        let fx = Fixture::new();
        let resolved = fx.resolve();
        let dir = resolved.session().session_dir();
        let (first, first_info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        let (second, second_info) = object("1.2.3.5", TransferSyntax::ExplicitVrLittleEndian);

        let hook_dir = dir.clone();
        let hook_bytes = first.clone();
        let registry = Arc::new(Interleaving {
            inner: fx.registry.clone(),
            hook: Mutex::new(Some(Box::new(move || {
                fs::create_dir_all(hook_dir.join("4")).unwrap();
                fs::write(hook_dir.join("4/IM1"), &hook_bytes).unwrap();
                let mut catalog = SessionCatalog::load(&hook_dir).unwrap();
                catalog.upsert(CatalogEntry {
                    uri: "4/IM1".into(),
                    scan: "4".into(),
                    sop_class_uid: "1.2.840.10008.5.1.4.1.1.4".into(),
                    sop_instance_uid: "1.2.3.4".into(),
                    transfer_syntax: "1.2.840.10008.1.2.1".into(),
                    size: hook_bytes.len() as u64,
                    digest: String::new(),
                });
                catalog.save(&hook_dir).unwrap();
            }))),
        });
        let writer = StorageWriter::new(
            registry,
            LockPolicy::default(),
            ShutdownSignal::new(),
            Arc::new(NoOpAnonymizer),
            Arc::new(NativeTranscoder),
            WriterSettings::default(),
        );

        let stored = writer
            .write(&fx.store, &resolved, &second_info, &second, Some("IM1"), &RoutingOverrides::default())
            .unwrap();
        assert_eq!(stored.name_choice, NameChoice::Generated);
        assert_ne!(stored.file_name, "IM1");
        assert_eq!(fs::read(dir.join("4/IM1")).unwrap(), first);
        assert_eq!(fs::read(&stored.path).unwrap(), second);

        let catalog = SessionCatalog::load(&dir).unwrap();
        assert_eq!(catalog.entries.len(), 2);
        assert_eq!(catalog.entry("4/IM1").unwrap().sop_instance_uid, first_info.sop_instance_uid);
        assert!(fx.registry.held().unwrap().is_empty());
    }

    #[test]
    fn session_archiving_mid_write_rejects_the_object() {
        let fx = Fixture::new();
        let writer = fx.writer(Arc::new(NoOpAnonymizer), WriterSettings::default());
        let first = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        writer
            .write(&fx.store, &first, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();

        let joined = fx.resolve();
        assert!(!joined.is_created());
        let locator = joined.session().locator();
        fx.store.transition(&locator, SessionStatus::InProgress).unwrap();

        let (bytes2, info2) = object("1.2.3.5", TransferSyntax::ExplicitVrLittleEndian);
        let err = writer
            .write(&fx.store, &joined, &info2, &bytes2, Some("IM2"), &RoutingOverrides::default())
            .unwrap_err();
        assert!(matches!(err, StagingError::SessionClosed { status: SessionStatus::InProgress, .. }));

        let dir = joined.session().session_dir();
        assert!(!dir.join("4/IM2").exists());
        let catalog = SessionCatalog::load(&dir).unwrap();
        assert_eq!(catalog.entries.len(), 1);
        assert!(fx.store.get(&locator).unwrap().is_some());
        assert!(fx.registry.held().unwrap().is_empty());
    }

    #[test]
    fn anonymization_failure_rolls_back_new_session() {
        let fx = Fixture::new();
        let settings = WriterSettings {
            anonymize: true,
            ..Default::default()
        };
        let writer = fx.writer(Arc::new(Failing), settings);
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);

        let err = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap_err();
        assert!(matches!(err, StagingError::Anonymization { session_removed: true, .. }));
        let session = resolved.session();
        assert!(fx.store.get(&session.locator()).unwrap().is_none());
        assert!(!session.session_dir().exists());
    }

    #[test]
    fn anonymization_failure_keeps_existing_session() {
        let fx = Fixture::new();
        let first = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        fx.writer(Arc::new(NoOpAnonymizer), WriterSettings::default())
            .write(&fx.store, &first, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();

        let joined = fx.resolve();
        assert!(!joined.is_created());
        let settings = WriterSettings {
            anonymize: true,
            ..Default::default()
        };
        let (bytes2, info2) = object("1.2.3.5", TransferSyntax::ExplicitVrLittleEndian);
        let err = fx
            .writer(Arc::new(Failing), settings)
            .write(&fx.store, &joined, &info2, &bytes2, Some("IM2"), &RoutingOverrides::default())
            .unwrap_err();
        assert!(matches!(err, StagingError::Anonymization { session_removed: false, .. }));
        let dir = joined.session().session_dir();
        assert!(dir.join("4/IM1").exists());
        assert!(!dir.join("4/IM2").exists());
    }

    #[test]
    fn pre_anonymized_objects_skip_anonymization() {
        let fx = Fixture::new();
        let settings = WriterSettings {
            anonymize: true,
            ..Default::default()
        };
        let writer = fx.writer(Arc::new(Failing), settings);
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        let overrides = RoutingOverrides {
            pre_anonymized: true,
            ..Default::default()
        };
        writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &overrides)
            .unwrap();
    }

    #[test]
    fn digest_covers_anonymized_bytes() {
        let fx = Fixture::new();
        let settings = WriterSettings {
            anonymize: true,
            ..Default::default()
        };
        let writer = fx.writer(Arc::new(Marking), settings);
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrLittleEndian);
        let stored = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();
        assert_eq!(stored.size, bytes.len() as u64 + 4);
        let on_disk = fs::read(&stored.path).unwrap();
        assert_eq!(stored.digest, blake3::hash(&on_disk).to_hex().to_string());
    }

    #[test]
    fn decompress_on_write_reencodes() {
        let fx = Fixture::new();
        let settings = WriterSettings {
            decompress_on_write: true,
            ..Default::default()
        };
        let writer = fx.writer(Arc::new(NoOpAnonymizer), settings);
        let resolved = fx.resolve();
        let (bytes, info) = object("1.2.3.4", TransferSyntax::ExplicitVrBigEndian);
        let stored = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();
        assert_eq!(stored.transfer_syntax, TransferSyntax::ExplicitVrLittleEndian);
        let reread = parse_object(&mut Cursor::new(fs::read(&stored.path).unwrap())).unwrap();
        assert_eq!(reread.transfer_syntax, TransferSyntax::ExplicitVrLittleEndian);
    }

    #[test]
    fn transcode_failure_keeps_original_bytes() {
        let fx = Fixture::new();
        let settings = WriterSettings {
            decompress_on_write: true,
            ..Default::default()
        };
        let writer = fx.writer(Arc::new(NoOpAnonymizer), settings);
        let resolved = fx.resolve();
        let jpeg = TransferSyntax::Encapsulated("1.2.840.10008.1.2.4.50".into());
        let (bytes, info) = object("1.2.3.4", jpeg.clone());
        let stored = writer
            .write(&fx.store, &resolved, &info, &bytes, Some("IM1"), &RoutingOverrides::default())
            .unwrap();
        assert_eq!(stored.transfer_syntax, jpeg);
        assert_eq!(fs::read(&stored.path).unwrap(), bytes);
    }
}
