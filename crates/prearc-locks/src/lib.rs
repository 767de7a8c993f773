//! Lock registry for the prearchive.
//!
//! The registry is the only shared mutable structure in the core: a set of
//! opaque tokens naming resources (`subject:<project>/<label>`, a staging
//! session path, a destination session id, a scan file). Acquisition is an
//! atomic check-and-insert; release is unconditional.
//!
//! # Architecture
//!
//! - **[`LockRegistry`]** is the pluggable backend. [`InMemoryLockRegistry`]
//!   serves single-instance deployments; a distributed TTL store can implement
//!   the same trait for multi-instance ones.
//! - **[`LockScope`]** tracks every token acquired by one unit of work and
//!   releases each exactly once, on every exit path, when dropped.
//! - **[`LockPolicy`]** picks the discipline per token class: fail-fast for
//!   session, path and file tokens; retry-with-backoff for subject creation.
//! - **[`ShutdownSignal`]** interrupts backoff waits.
//!
//! # Modules
//!
//! - [`error`]: Error types for lock operations
//! - [`token`]: [`LockToken`] and [`LockClass`]
//! - [`traits`]: The [`LockRegistry`] trait
//! - [`memory`]: In-process [`InMemoryLockRegistry`]
//! - [`policy`]: [`Discipline`] and [`LockPolicy`]
//! - [`scope`]: Scoped acquisition via [`LockScope`]
//! - [`shutdown`]: Interruptible waits

pub mod error;
pub mod memory;
pub mod policy;
pub mod scope;
pub mod shutdown;
pub mod token;
pub mod traits;

pub use error::{LockError, LockResult};
pub use memory::InMemoryLockRegistry;
pub use policy::{Discipline, LockPolicy};
pub use scope::LockScope;
pub use shutdown::ShutdownSignal;
pub use token::{LockClass, LockToken};
pub use traits::LockRegistry;
