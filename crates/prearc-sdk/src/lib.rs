//! High-level SDK for the prearchive.
//!
//! [`Prearchive`] wires the import pipeline and the merge engine from one
//! [`SiteConfig`] and is the entry point for applications embedding the
//! prearchive. Collaborators default to in-memory or no-op implementations
//! and can be swapped through [`PrearchiveBuilder`].

pub mod config;
pub mod error;
pub mod prearchive;

pub use config::{ProjectConfig, SiteConfig};
pub use error::{SdkError, SdkResult};
pub use prearchive::{Prearchive, PrearchiveBuilder, TriggerOutcome};

// Re-export the types callers need most
pub use prearc_merge::{ArchiveParams, ArchiveRequest, MergeError, MergeOutcome};
pub use prearc_services::Principal;
pub use prearc_staging::{ImportOutcome, ImportReport};
pub use prearc_types::{
    ErrorCategory, Notice, NoticeCode, NoticeKind, Operation, RoutingOverrides, SessionLocator,
    SessionStatus, StagingSession,
};
