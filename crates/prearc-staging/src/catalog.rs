//! On-disk session catalog.
//!
//! Each session directory holds one `catalog.json` describing its scans and
//! the files stored in them. The catalog is the single source of truth for
//! what a session contains; file URIs are relative to the session directory
//! (`<scan>/<filename>`). Rewrites go through a temp file in the same
//! directory plus a rename, so readers see either the old or the new catalog.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use prearc_locks::{LockScope, LockToken};

use crate::error::StagingResult;

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogScan {
    pub id: String,
    pub series_instance_uid: Option<String>,
    pub series_number: Option<i32>,
    pub modality: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Path relative to the session directory.
    pub uri: String,
    pub scan: String,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax: String,
    pub size: u64,
    /// BLAKE3 digest of the stored bytes, hex encoded.
    pub digest: String,
}

impl CatalogEntry {
    pub fn file_name(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(&self.uri)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCatalog {
    pub scans: Vec<CatalogScan>,
    pub entries: Vec<CatalogEntry>,
}

impl SessionCatalog {
    pub fn path(session_dir: &Path) -> PathBuf {
        session_dir.join(CATALOG_FILE)
    }

    /// Load the catalog of a session; a missing file is an empty catalog.
    pub fn load(session_dir: &Path) -> StagingResult<Self> {
        match fs::read(Self::path(session_dir)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the catalog file.
    pub fn save(&self, session_dir: &Path) -> StagingResult<()> {
        fs::create_dir_all(session_dir)?;
        let mut tmp = NamedTempFile::new_in(session_dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(Self::path(session_dir))
            .map_err(|e| e.error)?;
        Ok(())
    }

    pub fn scan(&self, id: &str) -> Option<&CatalogScan> {
        self.scans.iter().find(|s| s.id == id)
    }

    pub fn scan_by_uid(&self, uid: &str) -> Option<&CatalogScan> {
        self.scans
            .iter()
            .find(|s| s.series_instance_uid.as_deref() == Some(uid))
    }

    pub fn entry(&self, uri: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.uri == uri)
    }

    pub fn entries_for_scan<'a>(&'a self, scan: &'a str) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries.iter().filter(move |e| e.scan == scan)
    }

    /// Add the scan unless one with the same id is already listed.
    pub fn ensure_scan(&mut self, scan: CatalogScan) {
        if self.scan(&scan.id).is_none() {
            self.scans.push(scan);
        }
    }

    /// Insert an entry, replacing any entry with the same URI.
    pub fn upsert(&mut self, entry: CatalogEntry) {
        match self.entries.iter_mut().find(|e| e.uri == entry.uri) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, uri: &str) -> Option<CatalogEntry> {
        let pos = self.entries.iter().position(|e| e.uri == uri)?;
        Some(self.entries.remove(pos))
    }

    /// Rename a scan and rewrite the URIs of its entries to the new
    /// subdirectory.
    pub fn rename_scan(&mut self, from: &str, to: &str) {
        for scan in self.scans.iter_mut().filter(|s| s.id == from) {
            scan.id = to.to_string();
        }
        let prefix = format!("{from}/");
        for entry in self.entries.iter_mut().filter(|e| e.scan == from) {
            entry.scan = to.to_string();
            if let Some(rest) = entry.uri.strip_prefix(&prefix) {
                entry.uri = format!("{to}/{rest}");
            }
        }
    }
}

/// Load-modify-save under the session's catalog lock. Nothing is saved
/// when `f` fails.
pub fn update_catalog<T>(
    scope: &mut LockScope,
    session_dir: &Path,
    f: impl FnOnce(&mut SessionCatalog) -> StagingResult<T>,
) -> StagingResult<T> {
    let token = LockToken::catalog(session_dir);
    scope.acquire(token.clone())?;
    let result: StagingResult<T> = (|| {
        let mut catalog = SessionCatalog::load(session_dir)?;
        let out = f(&mut catalog)?;
        catalog.save(session_dir)?;
        debug!(dir = %session_dir.display(), entries = catalog.entries.len(), "catalog saved");
        Ok(out)
    })();
    scope.release(&token)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagingError;
    use prearc_locks::{InMemoryLockRegistry, LockPolicy, LockRegistry, ShutdownSignal};
    use std::sync::Arc;

    fn entry(scan: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            uri: format!("{scan}/{name}"),
            scan: scan.into(),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.4".into(),
            sop_instance_uid: format!("1.2.3.{name}"),
            transfer_syntax: "1.2.840.10008.1.2.1".into(),
            size: 10,
            digest: "00".into(),
        }
    }

    #[test]
    fn missing_catalog_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SessionCatalog::load(dir.path()).unwrap(), SessionCatalog::default());
    }

    #[test]
    fn save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = SessionCatalog::default();
        catalog.upsert(entry("1", "a.dcm"));
        catalog.save(dir.path()).unwrap();
        catalog.upsert(entry("1", "b.dcm"));
        catalog.save(dir.path()).unwrap();

        let loaded = SessionCatalog::load(dir.path()).unwrap();
        assert_eq!(loaded.entries.len(), 2);
        // Only the catalog itself remains; no stray temp files.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(CATALOG_FILE)]);
    }

    #[test]
    fn upsert_replaces_same_uri() {
        let mut catalog = SessionCatalog::default();
        catalog.upsert(entry("1", "a.dcm"));
        let mut again = entry("1", "a.dcm");
        again.size = 99;
        catalog.upsert(again);
        assert_eq!(catalog.entries.len(), 1);
        assert_eq!(catalog.entries[0].size, 99);
    }

    #[test]
    fn rename_scan_rewrites_uris() {
        let mut catalog = SessionCatalog::default();
        catalog.ensure_scan(CatalogScan {
            id: "2".into(),
            ..Default::default()
        });
        catalog.upsert(entry("2", "a.dcm"));
        catalog.upsert(entry("20", "b.dcm"));
        catalog.rename_scan("2", "3");
        assert!(catalog.scan("3").is_some());
        assert_eq!(catalog.entries[0].uri, "3/a.dcm");
        assert_eq!(catalog.entries[1].uri, "20/b.dcm");
    }

    #[test]
    fn update_releases_catalog_lock() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryLockRegistry::new());
        let mut scope = LockScope::new(registry.clone(), LockPolicy::default(), ShutdownSignal::new());
        let n = update_catalog(&mut scope, dir.path(), |c| {
            c.upsert(entry("1", "a.dcm"));
            Ok(c.entries.len())
        })
        .unwrap();
        assert_eq!(n, 1);
        assert!(scope.held().is_empty());
        assert!(registry.held().unwrap().is_empty());
    }

    #[test]
    fn failed_update_saves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gone");
        let registry = Arc::new(InMemoryLockRegistry::new());
        let mut scope = LockScope::new(registry.clone(), LockPolicy::default(), ShutdownSignal::new());
        let result: StagingResult<()> = update_catalog(&mut scope, &dir, |c| {
            c.upsert(entry("1", "a.dcm"));
            Err(StagingError::MissingStudyUid)
        });
        assert!(matches!(result, Err(StagingError::MissingStudyUid)));
        assert!(!dir.exists());
        assert!(registry.held().unwrap().is_empty());
    }
}
