//! Routing identifier derivation.
//!
//! Project, subject and session labels are taken from the first non-empty
//! tag of an ordered list each. When enabled, a Patient Comments value of the
//! form `Project: P1 Subject: S1 Session: MR1` takes precedence.

use serde::{Deserialize, Serialize};

use crate::header::DicomHeader;
use crate::tag::Tag;

/// Identifiers derived from an object header. Any of them may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingIdentifiers {
    pub project: Option<String>,
    pub subject: Option<String>,
    pub session: Option<String>,
}

/// Ordered tag lists used for derivation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierRules {
    pub project_tags: Vec<Tag>,
    pub subject_tags: Vec<Tag>,
    pub session_tags: Vec<Tag>,
    pub use_patient_comments: bool,
}

impl Default for IdentifierRules {
    fn default() -> Self {
        Self {
            project_tags: vec![Tag::STUDY_DESCRIPTION, Tag::ACCESSION_NUMBER],
            subject_tags: vec![Tag::PATIENT_NAME],
            session_tags: vec![Tag::PATIENT_ID],
            use_patient_comments: true,
        }
    }
}

impl IdentifierRules {
    /// Highest tag consulted during derivation.
    pub fn max_tag(&self) -> Option<Tag> {
        let comments = self.use_patient_comments.then_some(Tag::PATIENT_COMMENTS);
        self.project_tags
            .iter()
            .chain(&self.subject_tags)
            .chain(&self.session_tags)
            .copied()
            .chain(comments)
            .max()
    }

    pub fn derive(&self, header: &DicomHeader) -> RoutingIdentifiers {
        let from_comments = if self.use_patient_comments {
            header
                .get(Tag::PATIENT_COMMENTS)
                .map(parse_comments)
                .unwrap_or_default()
        } else {
            RoutingIdentifiers::default()
        };
        RoutingIdentifiers {
            project: from_comments
                .project
                .or_else(|| first_value(header, &self.project_tags)),
            subject: from_comments
                .subject
                .or_else(|| first_value(header, &self.subject_tags)),
            session: from_comments
                .session
                .or_else(|| first_value(header, &self.session_tags)),
        }
    }
}

fn first_value(header: &DicomHeader, tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find_map(|t| header.get(*t))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `Project: X Subject: Y Session: Z` (keys case-insensitive, any
/// order, `;` or whitespace separated).
fn parse_comments(comments: &str) -> RoutingIdentifiers {
    let mut values: [Option<String>; 3] = Default::default();
    let mut pending: Option<usize> = None;
    for token in comments.split(|c: char| c.is_whitespace() || c == ';') {
        if token.is_empty() {
            continue;
        }
        let (key, rest) = match token.split_once(':') {
            Some((k, r)) => (Some(k.to_ascii_lowercase()), r),
            None => (None, token),
        };
        let slot = match key.as_deref() {
            Some("project") => Some(0),
            Some("subject") => Some(1),
            Some("session") => Some(2),
            _ => None,
        };
        if let Some(i) = slot {
            if rest.is_empty() {
                pending = Some(i);
            } else {
                values[i] = Some(rest.to_string());
                pending = None;
            }
            continue;
        }
        if let Some(i) = pending.take() {
            values[i].get_or_insert_with(|| token.to_string());
        }
    }
    let [project, subject, session] = values;
    RoutingIdentifiers {
        project,
        subject,
        session,
    }
}
