//! Scan id planning.

use std::collections::BTreeSet;

use prearc_types::sanitize_label;

/// Move one incoming scan to another id (and subdirectory).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRename {
    pub from: String,
    pub to: String,
}

/// Scan id changes to apply to the incoming session before it is merged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPlan {
    pub renames: Vec<ScanRename>,
}

impl ScanPlan {
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    /// The id an incoming scan ends up with.
    pub fn target_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|r| r.from == id)
            .map_or(id, |r| r.to.as_str())
    }
}

/// A fresh id for a scan whose id is taken: `<id>-<modality><n>` with the
/// smallest `n >= 1` not in `taken`.
pub fn synthesize_scan_id(id: &str, modality: Option<&str>, taken: &BTreeSet<String>) -> String {
    let suffix = modality
        .map(sanitize_label)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "SCAN".to_string());
    let mut n: u32 = 1;
    loop {
        let candidate = format!("{id}-{suffix}{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
