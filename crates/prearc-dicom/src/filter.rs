//! Inclusion filters.
//!
//! A filter decides from a bounded header whether an object is accepted. The
//! site filter and the destination project's filter are combined with AND;
//! an absent or disabled filter includes everything.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DicomError, DicomResult};
use crate::header::DicomHeader;
use crate::tag::Tag;

/// Decides whether an object is accepted.
pub trait ImportFilter: Send + Sync {
    /// Highest tag the filter inspects; `None` when it inspects nothing.
    fn max_tag(&self) -> Option<Tag>;

    /// Whether the object described by `header` should be imported.
    fn should_include(&self, header: &DicomHeader) -> bool;
}

/// Whether matching rules accept or reject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Include only objects matching at least one rule.
    Whitelist,
    /// Exclude objects matching any rule.
    #[default]
    Blacklist,
}

/// Serialized form of a single rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub tag: Tag,
    /// Regular expression matched against the whole value.
    pub pattern: String,
}

/// Serialized form of a [`TagFilter`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub mode: FilterMode,
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug)]
struct TagRule {
    tag: Tag,
    pattern: Regex,
}

/// A regex filter over header values. Missing elements match as the empty
/// string.
#[derive(Clone, Debug)]
pub struct TagFilter {
    mode: FilterMode,
    enabled: bool,
    rules: Vec<TagRule>,
}

impl TagFilter {
    pub fn from_config(config: &FilterConfig) -> DicomResult<Self> {
        let rules = config
            .rules
            .iter()
            .map(|r| {
                Regex::new(&format!("^(?:{})$", r.pattern))
                    .map(|pattern| TagRule { tag: r.tag, pattern })
                    .map_err(|e| DicomError::InvalidFilter {
                        tag: r.tag.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<DicomResult<Vec<_>>>()?;
        Ok(Self {
            mode: config.mode,
            enabled: config.enabled,
            rules,
        })
    }

    fn matches(&self, header: &DicomHeader) -> bool {
        self.rules.iter().any(|rule| {
            let value = header.get(rule.tag).unwrap_or("");
            rule.pattern.is_match(value)
        })
    }
}

impl ImportFilter for TagFilter {
    fn max_tag(&self) -> Option<Tag> {
        if !self.enabled {
            return None;
        }
        self.rules.iter().map(|r| r.tag).max()
    }

    fn should_include(&self, header: &DicomHeader) -> bool {
        if !self.enabled || self.rules.is_empty() {
            return true;
        }
        let matched = self.matches(header);
        let include = match self.mode {
            FilterMode::Whitelist => matched,
            FilterMode::Blacklist => !matched,
        };
        if !include {
            debug!(mode = ?self.mode, "object rejected by tag filter");
        }
        include
    }
}
