//! Record stores for the prearchive.
//!
//! The relational store of a full deployment is an external collaborator.
//! This crate defines the contracts the core relies on, [`StagingStore`] and
//! [`ArchiveStore`], and in-memory implementations used by tests, the CLI and
//! single-process deployments.
//!
//! # Modules
//!
//! - [`error`]: Error types for store operations
//! - [`records`]: Archived project, subject, session and scan records
//! - [`traits`]: The [`StagingStore`] and [`ArchiveStore`] traits
//! - [`memory`]: In-memory implementations

pub mod error;
pub mod memory;
pub mod records;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryArchiveStore, InMemoryStagingStore};
pub use records::{ArchivedSession, ProjectRecord, QuarantineCode, ScanRecord, SubjectRecord};
pub use traits::{ArchiveStore, Resolved, StagingStore};
