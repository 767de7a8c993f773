//! File transfer from staging into the archive.
//!
//! A merge never edits the destination in place. The incoming files are
//! copied into a private work area, relocated there, combined with a copy of
//! the destination, and only then swapped in:
//!
//! ```text
//! <archive root>/.merge/<session id>-<uuid>/incoming   staging copy
//!                                          /merged     destination + incoming
//!                                          /previous   destination before swap
//! ```
//!
//! When anything fails the destination is put back and the work area moves
//! to `<failed root>/<yyyyMMdd>/` for inspection.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use prearc_locks::LockScope;
use prearc_staging::{first_free_variant, CatalogEntry, SessionCatalog};

use crate::error::{MergeError, MergeResult};
use crate::relocate::relocate_scans;
use crate::scan_ids::ScanPlan;

pub const WORK_DIR: &str = ".merge";

/// Recursively copy `src` into `dst`, creating directories as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> MergeResult<u64> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

/// Private directory of one merge attempt.
#[derive(Debug)]
pub struct WorkArea {
    root: PathBuf,
    name: String,
    failed_root: PathBuf,
}

impl WorkArea {
    pub fn create(archive_root: &Path, failed_root: &Path, session_id: &str) -> MergeResult<Self> {
        let name = format!("{session_id}-{}", Uuid::now_v7().simple());
        let root = archive_root.join(WORK_DIR).join(&name);
        fs::create_dir_all(&root)?;
        debug!(dir = %root.display(), "merge work area created");
        Ok(Self {
            root,
            name,
            failed_root: failed_root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn incoming(&self) -> PathBuf {
        self.root.join("incoming")
    }

    pub fn merged(&self) -> PathBuf {
        self.root.join("merged")
    }

    pub fn previous(&self) -> PathBuf {
        self.root.join("previous")
    }

    /// Move the whole work area into the failed area and return its new path.
    pub fn quarantine(self) -> MergeResult<PathBuf> {
        let day = self.failed_root.join(Utc::now().format("%Y%m%d").to_string());
        fs::create_dir_all(&day)?;
        let target = day.join(&self.name);
        if fs::rename(&self.root, &target).is_err() {
            copy_tree(&self.root, &target)?;
            fs::remove_dir_all(&self.root)?;
        }
        warn!(dir = %target.display(), "partial merge moved to failed area");
        Ok(target)
    }

    pub fn discard(self) -> MergeResult<()> {
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}

/// Build the merged session directory and swap it in for `dest_dir`.
///
/// Returns the merged catalog. On error the destination is left as it was.
pub fn transfer(
    scope: &mut LockScope,
    work: &WorkArea,
    staging_dir: &Path,
    dest_dir: &Path,
    plan: &ScanPlan,
) -> MergeResult<SessionCatalog> {
    let incoming = work.incoming();
    let merged = work.merged();

    let bytes = copy_tree(staging_dir, &incoming)?;
    debug!(bytes, from = %staging_dir.display(), "staging copied");
    relocate_scans(scope, &incoming, &plan.renames)?;

    if dest_dir.exists() {
        copy_tree(dest_dir, &merged)?;
    } else {
        fs::create_dir_all(&merged)?;
    }

    let incoming_catalog = SessionCatalog::load(&incoming)?;
    let mut catalog = SessionCatalog::load(&merged)?;
    for scan in incoming_catalog.scans {
        catalog.ensure_scan(scan);
    }
    for mut entry in incoming_catalog.entries {
        let from = incoming.join(&entry.uri);
        if !destination_takes(&catalog, &merged, &entry) {
            let name = free_name(&catalog, &merged, &entry)?;
            debug!(uri = %entry.uri, renamed = %name, "destination holds another object under this name");
            entry.uri = format!("{}/{name}", entry.scan);
        }
        let to = merged.join(&entry.uri);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
        catalog.upsert(entry);
    }
    catalog.save(&merged)?;

    swap_in(work, dest_dir)?;
    info!(dest = %dest_dir.display(), files = catalog.entries.len(), "merged session swapped in");
    Ok(catalog)
}

/// Whether `entry` may be stored under its own URI in `merged`: the name is
/// unused there, or it holds the same object.
fn destination_takes(catalog: &SessionCatalog, merged: &Path, entry: &CatalogEntry) -> bool {
    match catalog.entry(&entry.uri) {
        Some(existing) => {
            existing.sop_class_uid == entry.sop_class_uid
                && existing.sop_instance_uid == entry.sop_instance_uid
        }
        None => !merged.join(&entry.uri).exists(),
    }
}

fn free_name(catalog: &SessionCatalog, merged: &Path, entry: &CatalogEntry) -> MergeResult<String> {
    first_free_variant(entry.file_name(), |name| {
        let uri = format!("{}/{name}", entry.scan);
        catalog.entry(&uri).is_none() && !merged.join(&uri).exists()
    })
    .ok_or_else(|| MergeError::NoFreeName(entry.uri.clone()))
}

fn swap_in(work: &WorkArea, dest_dir: &Path) -> MergeResult<()> {
    let existed = dest_dir.exists();
    if existed {
        fs::rename(dest_dir, work.previous())?;
    } else if let Some(parent) = dest_dir.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(work.merged(), dest_dir) {
        if existed {
            fs::rename(work.previous(), dest_dir)?;
        }
        return Err(e.into());
    }
    Ok(())
}

/// Undo a completed swap: the merged directory goes back into the work area
/// and the previous destination (if any) is restored.
pub fn swap_out(work: &WorkArea, dest_dir: &Path) -> MergeResult<()> {
    if dest_dir.exists() {
        fs::rename(dest_dir, work.merged())?;
    }
    if work.previous().exists() {
        fs::rename(work.previous(), dest_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_ids::ScanRename;
    use prearc_locks::{InMemoryLockRegistry, LockPolicy, ShutdownSignal};
    use prearc_staging::CatalogScan;
    use std::sync::Arc;

    fn seed(dir: &Path, scan: &str, file: &str, body: &[u8]) {
        seed_instance(dir, scan, file, &format!("1.2.{scan}.{file}"), body);
    }

    fn seed_instance(dir: &Path, scan: &str, file: &str, instance: &str, body: &[u8]) {
        fs::create_dir_all(dir.join(scan)).unwrap();
        fs::write(dir.join(scan).join(file), body).unwrap();
        let mut catalog = SessionCatalog::load(dir).unwrap();
        catalog.ensure_scan(CatalogScan {
            id: scan.into(),
            ..Default::default()
        });
        catalog.upsert(CatalogEntry {
            uri: format!("{scan}/{file}"),
            scan: scan.into(),
            sop_class_uid: "1.2".into(),
            sop_instance_uid: instance.into(),
            transfer_syntax: "1.2.840.10008.1.2.1".into(),
            size: body.len() as u64,
            digest: "00".into(),
        });
        catalog.save(dir).unwrap();
    }

    fn scope() -> LockScope {
        LockScope::new(
            Arc::new(InMemoryLockRegistry::new()),
            LockPolicy::default(),
            ShutdownSignal::new(),
        )
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        seed(&tmp.path().join("src"), "1", "a.dcm", b"abc");
        let n = copy_tree(&tmp.path().join("src"), &tmp.path().join("dst")).unwrap();
        assert!(n >= 3);
        assert_eq!(fs::read(tmp.path().join("dst/1/a.dcm")).unwrap(), b"abc");
    }

    #[test]
    fn merge_into_existing_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let dest = tmp.path().join("arc/P1/arc001/MR1");
        seed(&staging, "2", "b.dcm", b"new");
        seed(&dest, "3", "a.dcm", b"old");

        let work = WorkArea::create(&tmp.path().join("arc"), &tmp.path().join("failed"), "E1").unwrap();
        let plan = ScanPlan {
            renames: vec![ScanRename {
                from: "2".into(),
                to: "3".into(),
            }],
        };
        let catalog = transfer(&mut scope(), &work, &staging, &dest, &plan).unwrap();

        assert_eq!(catalog.entries.len(), 2);
        assert_eq!(fs::read(dest.join("3/a.dcm")).unwrap(), b"old");
        assert_eq!(fs::read(dest.join("3/b.dcm")).unwrap(), b"new");
        assert!(SessionCatalog::path(&dest).is_file());
        assert!(staging.join("2/b.dcm").exists());
        work.discard().unwrap();
        assert!(fs::read_dir(tmp.path().join("arc").join(WORK_DIR)).unwrap().next().is_none());
    }

    #[test]
    fn different_object_under_same_name_is_kept_beside() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let dest = tmp.path().join("arc/P1/arc001/MR1");
        seed_instance(&dest, "1", "IM1", "1.2.3.1.1", b"archived");
        seed_instance(&staging, "1", "IM1", "1.2.3.1.2", b"incoming");

        let work = WorkArea::create(&tmp.path().join("arc"), &tmp.path().join("failed"), "E1").unwrap();
        let catalog = transfer(&mut scope(), &work, &staging, &dest, &ScanPlan::default()).unwrap();

        assert_eq!(fs::read(dest.join("1/IM1")).unwrap(), b"archived");
        assert_eq!(fs::read(dest.join("1/IM1-1")).unwrap(), b"incoming");
        let mut instances: Vec<_> = catalog
            .entries
            .iter()
            .map(|e| (e.uri.as_str(), e.sop_instance_uid.as_str()))
            .collect();
        instances.sort();
        assert_eq!(instances, [("1/IM1", "1.2.3.1.1"), ("1/IM1-1", "1.2.3.1.2")]);
        assert_eq!(SessionCatalog::load(&dest).unwrap(), catalog);
    }

    #[test]
    fn same_object_under_same_name_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let dest = tmp.path().join("arc/P1/arc001/MR1");
        seed_instance(&dest, "1", "IM1", "1.2.3.1.1", b"old");
        seed_instance(&staging, "1", "IM1", "1.2.3.1.1", b"new");

        let work = WorkArea::create(&tmp.path().join("arc"), &tmp.path().join("failed"), "E1").unwrap();
        let catalog = transfer(&mut scope(), &work, &staging, &dest, &ScanPlan::default()).unwrap();

        assert_eq!(catalog.entries.len(), 1);
        assert_eq!(fs::read(dest.join("1/IM1")).unwrap(), b"new");
        assert!(!dest.join("1/IM1-1").exists());
    }

    #[test]
    fn swap_out_restores_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let dest = tmp.path().join("arc/P1/arc001/MR1");
        seed(&staging, "1", "b.dcm", b"new");
        seed(&dest, "5", "a.dcm", b"old");
        let work = WorkArea::create(&tmp.path().join("arc"), &tmp.path().join("failed"), "E1").unwrap();
        transfer(&mut scope(), &work, &staging, &dest, &ScanPlan::default()).unwrap();

        swap_out(&work, &dest).unwrap();
        assert!(!dest.join("1").exists());
        assert_eq!(fs::read(dest.join("5/a.dcm")).unwrap(), b"old");

        let failed = work.quarantine().unwrap();
        assert!(failed.starts_with(tmp.path().join("failed")));
        assert!(failed.join("merged/1/b.dcm").exists());
    }
}
