//! External collaborator contracts for the prearchive.
//!
//! The core never looks collaborators up; callers inject them. Each contract
//! comes with the trivial implementation a single-process deployment needs
//! (allow-all, no-op) and, where tests need to observe calls, a recording one.
//!
//! # Modules
//!
//! - [`auth`]: [`Principal`], [`Target`] and the [`PermissionChecker`] trait
//! - [`dispatch`]: asynchronous operation dispatch
//! - [`audit`]: the audit / workflow log
//! - [`anonymize`]: the anonymization service
//! - [`events`]: archive events, cache invalidation and post-merge hooks

pub mod anonymize;
pub mod audit;
pub mod auth;
pub mod dispatch;
pub mod error;
pub mod events;

pub use anonymize::{AnonymizationRequest, Anonymizer, NoOpAnonymizer};
pub use audit::{
    AuditEntry, AuditLog, AuditRecord, AuditStatus, EventCategory, InMemoryAuditLog,
    DEFAULT_JUSTIFICATION,
};
pub use auth::{require, AllowAll, PermissionChecker, Principal, ProjectMembership, Target};
pub use dispatch::{
    Dispatcher, DownstreamTrigger, NoOpDispatcher, OperationRequest, RecordingDispatcher,
};
pub use error::{ServiceError, ServiceResult};
pub use events::{
    ArchiveEvent, ArchiveEventKind, EventSink, MergeHook, MergeSummary, NoOpEventSink, NoOpHook,
    RecordingEventSink,
};
