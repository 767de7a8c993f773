//! Foundation types for the prearchive.
//!
//! Every other prearc crate depends on `prearc-types`. It holds the data model
//! shared by the import path (filter, resolver, writer) and the archive path
//! (merge engine, validation).
//!
//! # Key Types
//!
//! - [`StagingSession`]: a not-yet-archived grouping of imaging objects
//! - [`SessionLocator`]: `(project, timestamp, folder)`, the unique storage location
//! - [`SessionKey`]: `(project, study UID[, modality])`, the dedup key
//! - [`SessionStatus`]: lifecycle state machine for staging sessions
//! - [`Operation`]: named actions that can be queued against a session
//! - [`ImportUnit`]: one imaging object plus routing overrides
//! - [`Conflict`] / [`Notice`]: merge findings and their stable codes

pub mod conflict;
pub mod error;
pub mod import;
pub mod label;
pub mod operation;
pub mod session;
pub mod status;
pub mod timestamp;

pub use conflict::{Conflict, ConflictKind, Notice, NoticeCode, NoticeKind, Severity};
pub use error::{ErrorCategory, TypeError};
pub use import::{ImportUnit, RoutingOverrides};
pub use label::{is_valid_label, sanitize_label};
pub use operation::Operation;
pub use session::{
    SessionKey, SessionLocator, StagingSession, StorageTarget, UNASSIGNED_PROJECT_DIR,
};
pub use status::SessionStatus;
pub use timestamp::SessionTimestamp;
