//! The import pipeline: filter, parse, resolve, write.
//!
//! Single objects go through [`Importer::import_object`]. Zip archives and
//! directories are expanded entry by entry and each entry takes the same
//! path; per-entry failures are collected into an [`ImportReport`] instead of
//! aborting the batch. A permission failure aborts the batch.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use prearc_dicom::{parse_object, ProgressiveFilter};
use prearc_services::{require, PermissionChecker, Principal, ServiceError, Target};
use prearc_store::Resolved;
use prearc_types::{ImportUnit, RoutingOverrides, SessionLocator};

use crate::error::{StagingError, StagingResult};
use crate::resolver::{ResolveRequest, SessionResolver};
use crate::writer::{StorageWriter, StoredObject};

/// Result of importing one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    Stored(StoredObject),
    /// Excluded by the site or project filter.
    Filtered,
}

/// Tally of a batch import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub stored: usize,
    pub filtered: usize,
    /// `(entry name, error)` for every entry that could not be imported.
    pub failed: Vec<(String, String)>,
    /// Sessions that received at least one object.
    pub sessions: BTreeSet<SessionLocator>,
    /// Sessions created during this batch.
    pub created: BTreeSet<SessionLocator>,
}

impl ImportReport {
    fn record(&mut self, name: &str, result: StagingResult<ImportOutcome>) -> StagingResult<()> {
        match result {
            Ok(ImportOutcome::Stored(stored)) => {
                self.stored += 1;
                let locator = stored.session.locator();
                if stored.created_session {
                    self.created.insert(locator.clone());
                }
                self.sessions.insert(locator);
            }
            Ok(ImportOutcome::Filtered) => self.filtered += 1,
            Err(e @ StagingError::Service(ServiceError::Forbidden { .. })) => return Err(e),
            Err(e) => {
                debug!(entry = name, error = %e, "entry failed");
                self.failed.push((name.to_string(), e.to_string()));
            }
        }
        Ok(())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Importer {
    filter: ProgressiveFilter,
    resolver: SessionResolver,
    writer: StorageWriter,
    permissions: Arc<dyn PermissionChecker>,
}

impl std::fmt::Debug for Importer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Importer")
            .field("filter", &self.filter)
            .field("resolver", &self.resolver)
            .field("writer", &self.writer)
            .finish()
    }
}

impl Importer {
    pub fn new(
        filter: ProgressiveFilter,
        resolver: SessionResolver,
        writer: StorageWriter,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            filter,
            resolver,
            writer,
            permissions,
        }
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    /// Import one object.
    ///
    /// Objects routed to a project need edit permission on it; objects with
    /// no project land in the unassigned area without a check.
    pub fn import_object(
        &self,
        principal: &Principal,
        unit: &ImportUnit,
    ) -> StagingResult<ImportOutcome> {
        let mut reader = unit.reader();
        let outcome = self
            .filter
            .evaluate(&mut reader, unit.overrides.project.as_deref())?;
        if !outcome.included {
            debug!(name = ?unit.name, project = ?outcome.project, "object filtered out");
            return Ok(ImportOutcome::Filtered);
        }

        if let Some(project) = outcome.project.as_deref() {
            let target = Target::Project(project.to_string());
            let allowed = self.permissions.can_edit(principal, &target)?;
            require(allowed, principal, "import into", &target)?;
        }

        let info = parse_object(&mut reader)?;
        let request = ResolveRequest {
            project: outcome.project.as_deref(),
            identifiers: &outcome.identifiers,
            info: &info,
            overrides: &unit.overrides,
        };
        let write = |resolved: &Resolved| {
            let store = self.resolver.store_for(resolved.session().target);
            self.writer.write(
                store.as_ref(),
                resolved,
                &info,
                &unit.data,
                unit.file_name(),
                &unit.overrides,
            )
        };
        let resolved = self.resolver.resolve(&request)?;
        let stored = match write(&resolved) {
            // The joined session started archiving; a fresh resolve opens a
            // new one.
            Err(StagingError::SessionClosed { session, status }) => {
                debug!(%session, %status, "session closed during write, resolving again");
                write(&self.resolver.resolve(&request)?)?
            }
            other => other?,
        };
        Ok(ImportOutcome::Stored(stored))
    }

    /// Import every file entry of a zip archive held in memory. Entries with
    /// path traversal components are skipped.
    pub fn import_zip(
        &self,
        principal: &Principal,
        archive: &[u8],
        overrides: &RoutingOverrides,
    ) -> StagingResult<ImportReport> {
        let mut zip = ZipArchive::new(Cursor::new(archive))?;
        let mut report = ImportReport::default();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if name.contains("..") || entry.enclosed_name().is_none() {
                warn!(entry = %name, "skipping unsafe zip entry");
                report.failed.push((name, "unsafe entry path".to_string()));
                continue;
            }
            let mut data = Vec::with_capacity(entry.size().min(64 << 20) as usize);
            if let Err(e) = entry.read_to_end(&mut data) {
                report.failed.push((name, e.to_string()));
                continue;
            }
            let unit = ImportUnit::new(Some(name.clone()), data, overrides.clone());
            report.record(&name, self.import_object(principal, &unit))?;
        }
        info!(
            stored = report.stored,
            filtered = report.filtered,
            failed = report.failed.len(),
            sessions = report.sessions.len(),
            "zip import finished"
        );
        Ok(report)
    }

    /// Import every regular file below `dir`, in file name order.
    pub fn import_dir(
        &self,
        principal: &Principal,
        dir: &Path,
        overrides: &RoutingOverrides,
    ) -> StagingResult<ImportReport> {
        let mut report = ImportReport::default();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let name = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!(path = %name, error = %e, "walk error");
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            let result = fs::read(entry.path())
                .map_err(StagingError::from)
                .and_then(|data| {
                    let unit = ImportUnit::new(Some(name.clone()), data, overrides.clone());
                    self.import_object(principal, &unit)
                });
            report.record(&name, result)?;
        }
        info!(
            dir = %dir.display(),
            stored = report.stored,
            filtered = report.filtered,
            failed = report.failed.len(),
            "directory import finished"
        );
        Ok(report)
    }

    /// Import a file, a `.zip` archive or a directory tree.
    pub fn import_path(
        &self,
        principal: &Principal,
        path: &Path,
        overrides: &RoutingOverrides,
    ) -> StagingResult<ImportReport> {
        if path.is_dir() {
            return self.import_dir(principal, path, overrides);
        }
        let data = fs::read(path)?;
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            return self.import_zip(principal, &data, overrides);
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let label = name.clone().unwrap_or_else(|| path.display().to_string());
        let unit = ImportUnit::new(name, data, overrides.clone());
        let mut report = ImportReport::default();
        report.record(&label, self.import_object(principal, &unit))?;
        Ok(report)
    }
}
