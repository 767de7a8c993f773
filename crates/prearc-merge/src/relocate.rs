//! Scan relocation inside a session directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use prearc_locks::{LockScope, LockToken};
use prearc_staging::SessionCatalog;

use crate::error::MergeResult;
use crate::scan_ids::ScanRename;

const PARKING_PREFIX: &str = ".relocating-";

/// Apply scan renames to the files and the catalog of `session_dir`.
///
/// Moves go through parking names first, so chains and swaps (`2 -> 3`,
/// `3 -> 4`) never overwrite each other. Runs under the session's catalog
/// lock; if a move fails the ones already done are undone.
pub fn relocate_scans(scope: &mut LockScope, session_dir: &Path, renames: &[ScanRename]) -> MergeResult<()> {
    if renames.is_empty() {
        return Ok(());
    }
    let token = LockToken::catalog(session_dir);
    scope.acquire(token.clone())?;
    let result = relocate_locked(session_dir, renames);
    scope.release(&token)?;
    result
}

fn relocate_locked(session_dir: &Path, renames: &[ScanRename]) -> MergeResult<()> {
    let mut catalog = SessionCatalog::load(session_dir)?;
    let mut done: Vec<(PathBuf, PathBuf)> = Vec::new();

    let moved = (|| -> MergeResult<()> {
        for (i, r) in renames.iter().enumerate() {
            let from = session_dir.join(&r.from);
            if from.exists() {
                let parked = session_dir.join(format!("{PARKING_PREFIX}{i}"));
                fs::rename(&from, &parked)?;
                done.push((from, parked));
            }
        }
        for (i, r) in renames.iter().enumerate() {
            let parked = session_dir.join(format!("{PARKING_PREFIX}{i}"));
            if parked.exists() {
                let to = session_dir.join(&r.to);
                fs::rename(&parked, &to)?;
                done.push((parked, to));
            }
        }
        Ok(())
    })();

    if let Err(e) = moved {
        for (original, current) in done.iter().rev() {
            if let Err(undo) = fs::rename(current, original) {
                warn!(from = %current.display(), to = %original.display(), error = %undo, "could not undo scan move");
            }
        }
        return Err(e);
    }

    for (i, r) in renames.iter().enumerate() {
        catalog.rename_scan(&r.from, &format!("{PARKING_PREFIX}{i}"));
    }
    for (i, r) in renames.iter().enumerate() {
        catalog.rename_scan(&format!("{PARKING_PREFIX}{i}"), &r.to);
        debug!(from = %r.from, to = %r.to, "scan relocated");
    }
    catalog.save(session_dir)?;
    Ok(())
}
