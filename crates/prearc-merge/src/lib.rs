//! The archive side of the prearchive.
//!
//! A staging session becomes an archived session through [`MergeEngine`]:
//! label and subject resolution, identity conflict detection against the
//! destination, scan id correction, a work-area transfer and the archive
//! record update. [`MergeEngine::validate`] runs the same checks without
//! side effects and reports every finding as a coded [`Notice`].
//!
//! # Modules
//!
//! - [`request`]: archive parameters, site settings and the outcome
//! - [`label`]: destination label priority and the labeling plugin
//! - [`subject`]: subject lookup and locked creation
//! - [`conflict`]: session and scan level identity checks
//! - [`scan_ids`]: scan id plans and synthesized ids
//! - [`relocate`]: scan renames on disk and in the catalog
//! - [`transfer`]: work area, merge and swap-in
//! - [`reporter`]: fail-fast and collecting finding sinks
//! - [`engine`]: the archive procedure
//! - [`validate`]: side-effect free validation
//!
//! [`Notice`]: prearc_types::Notice

pub mod conflict;
pub mod engine;
pub mod error;
pub mod label;
pub mod relocate;
pub mod reporter;
pub mod request;
pub mod scan_ids;
pub mod subject;
pub mod transfer;
pub mod validate;

pub use conflict::{detect_conflicts, ConflictPolicy, Incoming};
pub use engine::{MergeEngine, MergeServices};
pub use error::{MergeError, MergeResult};
pub use label::{resolve_label, LabelPlugin, SubjectModalityLabeler};
pub use reporter::{ReportMode, Reporter};
pub use request::{ArchiveParams, ArchiveRequest, MergeOutcome, MergeSettings};
pub use scan_ids::{synthesize_scan_id, ScanPlan, ScanRename};
pub use subject::{ensure_subject, lookup_subject, SubjectPlan};
pub use transfer::{copy_tree, WorkArea};

