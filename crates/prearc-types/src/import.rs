use std::io::Cursor;

use serde::{Deserialize, Serialize};

/// Routing overrides supplied with an imported object. Each populated field
/// wins over the value derived from the object header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOverrides {
    pub project: Option<String>,
    pub subject: Option<String>,
    pub session: Option<String>,
    pub visit: Option<String>,
    /// Try the direct-to-archive fast path instead of staging.
    pub direct_archive: bool,
    /// The sender runs its own post-processing; auto-archive is suppressed.
    pub custom_processing: bool,
    /// Always generate a safe filename instead of keeping the original one.
    pub force_rename: bool,
    /// The sender declares the object already anonymized.
    pub pre_anonymized: bool,
    pub source: Option<String>,
}

/// One imaging object plus its routing overrides. Transient and consumed once.
#[derive(Clone, Debug)]
pub struct ImportUnit {
    /// Name the object arrived under (upload filename, zip entry name, ...).
    pub name: Option<String>,
    pub data: Vec<u8>,
    pub overrides: RoutingOverrides,
}

impl ImportUnit {
    pub fn new(name: Option<String>, data: Vec<u8>, overrides: RoutingOverrides) -> Self {
        Self {
            name,
            data,
            overrides,
        }
    }

    /// The final path component of [`Self::name`], if any.
    pub fn file_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|n| n.rsplit(|c: char| c == '/' || c == '\\').next())
            .filter(|n| !n.is_empty())
    }

    /// A seekable view over the object bytes.
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.data.as_slice())
    }
}
