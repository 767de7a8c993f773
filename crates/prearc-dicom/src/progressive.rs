//! Progressive filtering.
//!
//! The first pass reads only as far as the site filter and identifier
//! derivation need. Once the destination project is known, its filter may
//! need a longer prefix; the same stream is then rewound and read again up to
//! that tag. The stream is always rewound before returning so the full object
//! can be parsed and stored afterwards.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use crate::error::DicomResult;
use crate::filter::ImportFilter;
use crate::header::{read_header, DicomHeader};
use crate::identity::{IdentifierRules, RoutingIdentifiers};
use crate::tag::Tag;

/// Result of filtering one object.
#[derive(Clone, Debug)]
pub struct FilterOutcome {
    /// AND of site and project filter results.
    pub included: bool,
    /// Destination project: the override if given, otherwise derived.
    pub project: Option<String>,
    pub identifiers: RoutingIdentifiers,
    /// The longest header prefix read.
    pub header: DicomHeader,
    /// How many times the stream was re-read for the project filter.
    pub rereads: u32,
}

/// Site filter, per-project filters and identifier rules.
#[derive(Clone, Default)]
pub struct ProgressiveFilter {
    site: Option<Arc<dyn ImportFilter>>,
    projects: HashMap<String, Arc<dyn ImportFilter>>,
    identity: IdentifierRules,
}

impl std::fmt::Debug for ProgressiveFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveFilter")
            .field("site", &self.site.is_some())
            .field("projects", &self.projects.keys().collect::<Vec<_>>())
            .field("identity", &self.identity)
            .finish()
    }
}

impl ProgressiveFilter {
    pub fn new(identity: IdentifierRules) -> Self {
        Self {
            site: None,
            projects: HashMap::new(),
            identity,
        }
    }

    pub fn with_site_filter(mut self, filter: Arc<dyn ImportFilter>) -> Self {
        self.site = Some(filter);
        self
    }

    pub fn with_project_filter(
        mut self,
        project: impl Into<String>,
        filter: Arc<dyn ImportFilter>,
    ) -> Self {
        self.projects.insert(project.into(), filter);
        self
    }

    pub fn identity(&self) -> &IdentifierRules {
        &self.identity
    }

    /// Tag the first pass stops before.
    fn first_stop(&self) -> Tag {
        let site = self.site.as_ref().and_then(|f| f.max_tag());
        [site, self.identity.max_tag()]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(Tag::SOP_CLASS_UID)
            .next()
    }

    /// Filter the object in `reader`. `project_override` replaces the
    /// derived project when routing was specified by the caller.
    pub fn evaluate<R: Read + Seek>(
        &self,
        reader: &mut R,
        project_override: Option<&str>,
    ) -> DicomResult<FilterOutcome> {
        let mut header = read_header(reader, self.first_stop())?;
        let identifiers = self.identity.derive(&header);
        let project = project_override
            .map(str::to_string)
            .or_else(|| identifiers.project.clone());

        let site_ok = self
            .site
            .as_ref()
            .map_or(true, |f| f.should_include(&header));

        let mut rereads = 0;
        let project_filter = project.as_ref().and_then(|p| self.projects.get(p));
        let project_ok = match project_filter {
            Some(filter) => {
                if let Some(max) = filter.max_tag() {
                    if !header.covers(max) {
                        debug!(
                            project = ?project,
                            from = %header.stop,
                            to = %max.next(),
                            "re-reading header for project filter"
                        );
                        header = read_header(reader, max.next())?;
                        rereads += 1;
                    }
                }
                filter.should_include(&header)
            }
            None => true,
        };

        reader.seek(SeekFrom::Start(0))?;
        Ok(FilterOutcome {
            included: site_ok && project_ok,
            project,
            identifiers,
            header,
            rereads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DatasetBuilder;
    use crate::filter::{FilterConfig, FilterMode, RuleConfig, TagFilter};
    use std::io::Cursor;

    fn object(project: &str, modality: &str, series: i32) -> Vec<u8> {
        DatasetBuilder::new()
            .sop("1.2.840.10008.5.1.4.1.1.4", "1.2.3.4.5")
            .modality(modality)
            .study_description(project)
            .patient_name("S1")
            .patient_id("MR1")
            .study_uid("1.2.3")
            .series_number(series)
            .build()
    }

    fn whitelist(tag: Tag, pattern: &str) -> Arc<dyn ImportFilter> {
        Arc::new(
            TagFilter::from_config(&FilterConfig {
                enabled: true,
                mode: FilterMode::Whitelist,
                rules: vec![RuleConfig {
                    tag,
                    pattern: pattern.into(),
                }],
            })
            .unwrap(),
        )
    }

    #[test]
    fn no_filters_includes() {
        let data = object("P1", "MR", 1);
        let mut cursor = Cursor::new(data.as_slice());
        let outcome = ProgressiveFilter::default()
            .evaluate(&mut cursor, None)
            .unwrap();
        assert!(outcome.included);
        assert_eq!(outcome.project.as_deref(), Some("P1"));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn site_and_project_are_anded() {
        let filter = ProgressiveFilter::default()
            .with_site_filter(whitelist(Tag::MODALITY, "MR|CT"))
            .with_project_filter("P1", whitelist(Tag::MODALITY, "CT"));

        let mr = object("P1", "MR", 1);
        let outcome = filter.evaluate(&mut Cursor::new(mr.as_slice()), None).unwrap();
        assert!(!outcome.included);

        let ct = object("P1", "CT", 1);
        let outcome = filter.evaluate(&mut Cursor::new(ct.as_slice()), None).unwrap();
        assert!(outcome.included);

        // Other projects only see the site filter.
        let p2 = object("P2", "MR", 1);
        let outcome = filter.evaluate(&mut Cursor::new(p2.as_slice()), None).unwrap();
        assert!(outcome.included);
    }

    #[test]
    fn project_filter_beyond_prefix_triggers_reread() {
        let filter = ProgressiveFilter::default()
            .with_project_filter("P1", whitelist(Tag::SERIES_NUMBER, "[0-9]"));

        let data = object("P1", "MR", 4);
        let mut cursor = Cursor::new(data.as_slice());
        let outcome = filter.evaluate(&mut cursor, None).unwrap();
        assert_eq!(outcome.rereads, 1);
        assert!(outcome.included);
        assert_eq!(outcome.header.get(Tag::SERIES_NUMBER), Some("4"));
        assert_eq!(cursor.position(), 0);

        let data = object("P1", "MR", 40);
        let outcome = filter.evaluate(&mut Cursor::new(data.as_slice()), None).unwrap();
        assert!(!outcome.included);
    }

    #[test]
    fn override_selects_project_filter() {
        let filter = ProgressiveFilter::default()
            .with_project_filter("P9", whitelist(Tag::MODALITY, "CT"));
        let data = object("P1", "MR", 1);
        let outcome = filter
            .evaluate(&mut Cursor::new(data.as_slice()), Some("P9"))
            .unwrap();
        assert_eq!(outcome.project.as_deref(), Some("P9"));
        assert!(!outcome.included);
    }

    #[test]
    fn first_pass_covers_identity_tags_only() {
        let filter = ProgressiveFilter::default();
        let data = object("P1", "MR", 1);
        let outcome = filter.evaluate(&mut Cursor::new(data.as_slice()), None).unwrap();
        assert_eq!(outcome.rereads, 0);
        assert_eq!(outcome.header.stop, Tag::PATIENT_COMMENTS.next());
        assert_eq!(outcome.header.get(Tag::STUDY_INSTANCE_UID), None);
    }
}
