//! Lock tokens and their classes.
//!
//! A token is an opaque string; the prefix before the first `:` names its
//! class, which decides the acquisition discipline.

use std::fmt;
use std::path::Path;

use prearc_types::SessionLocator;

use crate::error::{LockError, LockResult};

/// Resource class of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockClass {
    /// Subject creation inside a project.
    Subject,
    /// A staging session directory.
    Staging,
    /// An archived destination session (by id or by project/label).
    Destination,
    /// One `(scan, filename)` pair inside a session.
    ScanFile,
    /// A session's on-disk catalog.
    Catalog,
    /// Anything else.
    Other,
}

impl LockClass {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Staging => "prearchive",
            Self::Destination => "session",
            Self::ScanFile => "file",
            Self::Catalog => "catalog",
            Self::Other => "other",
        }
    }
}

/// An opaque string naming a lockable resource.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a raw token string. Rejects empty strings.
    pub fn parse(raw: impl Into<String>) -> LockResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(LockError::InvalidToken(raw));
        }
        Ok(Self(raw))
    }

    fn with_class(class: LockClass, rest: impl fmt::Display) -> Self {
        Self(format!("{}:{rest}", class.prefix()))
    }

    /// Subject creation lock. Labels compare case-insensitively.
    pub fn subject(project: &str, label: &str) -> Self {
        Self::with_class(
            LockClass::Subject,
            format_args!("{project}/{}", label.to_lowercase()),
        )
    }

    /// Staging session lock.
    pub fn staging(locator: &SessionLocator) -> Self {
        Self::with_class(LockClass::Staging, locator)
    }

    /// Destination session lock by archive id.
    pub fn destination(session_id: &str) -> Self {
        Self::with_class(LockClass::Destination, session_id)
    }

    /// Destination lock for a not-yet-minted session, by natural key.
    pub fn destination_label(project: &str, label: &str) -> Self {
        Self::with_class(LockClass::Destination, format_args!("{project}/{label}"))
    }

    /// Per-`(scan, filename)` write lock inside a session directory.
    pub fn scan_file(session_dir: &Path, scan: &str, filename: &str) -> Self {
        Self::with_class(
            LockClass::ScanFile,
            format_args!("{}/{scan}/{filename}", session_dir.display()),
        )
    }

    /// Catalog rewrite lock for a session directory.
    pub fn catalog(session_dir: &Path) -> Self {
        Self::with_class(LockClass::Catalog, session_dir.display())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The class encoded in the token prefix.
    pub fn class(&self) -> LockClass {
        let prefix = self.0.split(':').next().unwrap_or_default();
        [
            LockClass::Subject,
            LockClass::Staging,
            LockClass::Destination,
            LockClass::ScanFile,
            LockClass::Catalog,
        ]
        .into_iter()
        .find(|c| c.prefix() == prefix)
        .unwrap_or(LockClass::Other)
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
