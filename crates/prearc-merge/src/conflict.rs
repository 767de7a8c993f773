//! Identity conflict detection between an incoming session and its
//! destination.
//!
//! Session-level checks run in a fixed order: merge permitted, label,
//! project, modality, subject, study UID. Scan-level checks follow, one
//! incoming scan at a time, and produce the [`ScanPlan`].

use std::collections::BTreeSet;

use tracing::debug;

use prearc_staging::CatalogScan;
use prearc_store::ArchivedSession;
use prearc_types::{Conflict, ConflictKind, Notice, NoticeCode};

use crate::error::MergeResult;
use crate::reporter::Reporter;
use crate::scan_ids::{synthesize_scan_id, ScanPlan, ScanRename};

/// The incoming side of a merge.
#[derive(Clone, Copy, Debug)]
pub struct Incoming<'a> {
    pub project: &'a str,
    pub label: &'a str,
    /// Resolved subject id; `None` when the subject is yet to be created.
    pub subject_id: Option<&'a str>,
    pub subject_label: &'a str,
    pub study_uid: Option<&'a str>,
    pub modality: Option<&'a str>,
    pub scans: &'a [CatalogScan],
}

/// Switches that decide whether a finding blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictPolicy {
    pub allow_merge: bool,
    pub override_conflicts: bool,
    pub allow_cross_modality: bool,
    pub correct_scan_ids: bool,
    pub require_unique_study_uid: bool,
    /// The project opted out of study UID checks.
    pub uid_check_opt_out: bool,
}

/// Run every check and return the scan id plan.
///
/// `same_uid` lists other archived sessions of the project carrying the
/// incoming study UID; it is only consulted for a new destination.
pub fn detect_conflicts(
    incoming: &Incoming<'_>,
    destination: Option<&ArchivedSession>,
    same_uid: &[ArchivedSession],
    policy: &ConflictPolicy,
    reporter: &mut Reporter,
) -> MergeResult<ScanPlan> {
    let Some(dest) = destination else {
        check_unique_uid(incoming, same_uid, policy, reporter)?;
        return Ok(ScanPlan::default());
    };

    if !policy.allow_merge {
        reporter.conflict(Conflict::fatal(
            ConflictKind::Exists,
            format!("session {} already exists in {} and merging was not requested", dest.label, dest.project),
        ))?;
    }
    if dest.label != incoming.label {
        reporter.conflict(Conflict::fatal(
            ConflictKind::Label,
            format!("destination label {} differs from {}", dest.label, incoming.label),
        ))?;
    }
    if dest.project != incoming.project {
        reporter.conflict(Conflict::fatal(
            ConflictKind::Project,
            format!("destination project {} differs from {}", dest.project, incoming.project),
        ))?;
    }
    if let (Some(theirs), Some(ours)) = (dest.modality.as_deref(), incoming.modality) {
        if !theirs.eq_ignore_ascii_case(ours) && !policy.allow_cross_modality {
            reporter.conflict(Conflict::fatal(
                ConflictKind::Modality,
                format!("cannot merge {ours} data into a {theirs} session"),
            ))?;
        }
    }
    if incoming.subject_id != Some(dest.subject_id.as_str()) {
        reporter.conflict(Conflict::fatal(
            ConflictKind::Subject,
            format!("destination subject {} differs from {}", dest.subject_id, incoming.subject_label),
        ))?;
    }
    if let (Some(theirs), Some(ours)) = (dest.study_instance_uid.as_deref(), incoming.study_uid) {
        if theirs != ours && !policy.override_conflicts && !policy.uid_check_opt_out {
            reporter.conflict(Conflict::overridable(
                ConflictKind::Uid,
                format!("destination study UID {theirs} differs from {ours}"),
            ))?;
        }
    }

    plan_scans(incoming.scans, dest, policy, reporter)
}

fn check_unique_uid(
    incoming: &Incoming<'_>,
    same_uid: &[ArchivedSession],
    policy: &ConflictPolicy,
    reporter: &mut Reporter,
) -> MergeResult<()> {
    if !policy.require_unique_study_uid || policy.uid_check_opt_out || policy.override_conflicts {
        return Ok(());
    }
    let (Some(uid), Some(other)) = (incoming.study_uid, same_uid.first()) else {
        return Ok(());
    };
    reporter.conflict(Conflict::overridable(
        ConflictKind::DuplicateUid,
        format!("study {uid} is already archived as {} in {}", other.label, other.project),
    ))
}

fn plan_scans(
    scans: &[CatalogScan],
    dest: &ArchivedSession,
    policy: &ConflictPolicy,
    reporter: &mut Reporter,
) -> MergeResult<ScanPlan> {
    let mut plan = ScanPlan::default();
    let mut taken: BTreeSet<String> = dest.scans.iter().map(|s| s.id.clone()).collect();
    taken.extend(scans.iter().map(|s| s.id.clone()));

    for scan in scans {
        let uid = scan.series_instance_uid.as_deref();
        let by_uid = uid.and_then(|u| {
            dest.scans
                .iter()
                .find(|d| d.series_instance_uid.as_deref() == Some(u))
        });

        match by_uid {
            Some(d) if d.id == scan.id => {
                if !policy.allow_merge {
                    reporter.conflict(Conflict::fatal(
                        ConflictKind::ScanId,
                        format!("scan {} duplicates destination scan {}", scan.id, d.id),
                    ))?;
                }
            }
            Some(d) => {
                if policy.correct_scan_ids || policy.override_conflicts {
                    reporter.warning(Notice::warning(
                        NoticeCode::ScanNumberConflict,
                        format!("scan {} matches destination scan {} by UID and takes its id", scan.id, d.id),
                    ));
                    debug!(from = %scan.id, to = %d.id, "scan renumbered by UID");
                    plan.renames.push(ScanRename {
                        from: scan.id.clone(),
                        to: d.id.clone(),
                    });
                } else {
                    reporter.conflict(Conflict::fatal(
                        ConflictKind::ScanUid,
                        format!("scan {} has the UID of destination scan {}", scan.id, d.id),
                    ))?;
                }
            }
            None if dest.scan(&scan.id).is_some() => {
                let new_id = synthesize_scan_id(&scan.id, scan.modality.as_deref(), &taken);
                reporter.warning(Notice::warning(
                    NoticeCode::ScanIdCorrected,
                    format!("scan {} collides with a destination scan and becomes {new_id}", scan.id),
                ));
                debug!(from = %scan.id, to = %new_id, "scan id corrected");
                taken.insert(new_id.clone());
                plan.renames.push(ScanRename {
                    from: scan.id.clone(),
                    to: new_id,
                });
            }
            None => {}
        }
    }
    Ok(plan)
}
