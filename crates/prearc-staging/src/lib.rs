//! The import side of the prearchive.
//!
//! Objects arrive one by one, in zip archives or as directory trees. Each is
//! filtered, parsed, routed to a staging session and written under that
//! session's directory:
//!
//! ```text
//! <prearchive root>/<project>/<timestamp>/<session folder>/<scan>/<file>
//!                                                         /catalog.json
//! ```
//!
//! # Modules
//!
//! - [`resolver`]: atomic find-or-create of the target session
//! - [`naming`]: scan ids and collision-safe file names
//! - [`writer`]: locked, rollback-aware storage of object bytes
//! - [`catalog`]: the per-session `catalog.json`
//! - [`import`]: the full pipeline, single object and batch
//! - [`queue`]: marking sessions with a queued operation

pub mod catalog;
pub mod error;
pub mod import;
pub mod naming;
pub mod queue;
pub mod resolver;
pub mod writer;

pub use catalog::{update_catalog, CatalogEntry, CatalogScan, SessionCatalog, CATALOG_FILE};
pub use error::{StagingError, StagingResult};
pub use import::{ImportOutcome, ImportReport, Importer};
pub use naming::{
    choose_file_name, first_free_variant, is_valid_file_name, name_is_free_or_same, scan_id_for,
    NameChoice,
};
pub use queue::queue_operation;
pub use resolver::{ResolveRequest, ResolverSettings, SessionResolver};
pub use writer::{StorageWriter, StoredObject, WriterSettings};
