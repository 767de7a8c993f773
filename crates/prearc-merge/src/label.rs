//! Destination label resolution.

use prearc_staging::SessionCatalog;
use prearc_types::{is_valid_label, sanitize_label, StagingSession};

use crate::error::{MergeError, MergeResult};
use crate::request::ArchiveParams;

/// Site-specific labeling, consulted after the request's own label fields.
pub trait LabelPlugin: Send + Sync {
    fn label(&self, session: &StagingSession, catalog: &SessionCatalog) -> Option<String>;
}

/// Labels a session `<subject>_<first modality>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubjectModalityLabeler;

impl LabelPlugin for SubjectModalityLabeler {
    fn label(&self, session: &StagingSession, catalog: &SessionCatalog) -> Option<String> {
        let subject = session.subject.as_deref()?;
        let modality = catalog
            .scans
            .iter()
            .find_map(|s| s.modality.as_deref())
            .or(session.modality.as_deref())?;
        Some(format!("{subject}_{modality}"))
    }
}

/// Pick the destination label by priority and validate it.
pub fn resolve_label(
    params: &ArchiveParams,
    plugin: Option<&dyn LabelPlugin>,
    session: &StagingSession,
    catalog: &SessionCatalog,
) -> MergeResult<String> {
    let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let chosen = non_empty(&params.label)
        .or_else(|| non_empty(&params.typed_label))
        .or_else(|| non_empty(&params.label_param))
        .or_else(|| plugin.and_then(|p| p.label(session, catalog)).filter(|l| !l.trim().is_empty()))
        .or_else(|| non_empty(&params.descriptor_label))
        .or_else(|| Some(session.folder.clone()).filter(|f| !f.is_empty()))
        .or_else(|| Some(sanitize_label(&session.study_instance_uid)).filter(|f| !f.is_empty()));

    let Some(label) = chosen else {
        return Err(MergeError::InvalidLabel {
            label: String::new(),
            reason: "no label available".into(),
        });
    };
    is_valid_label(&label).map_err(|e| MergeError::InvalidLabel {
        label: label.clone(),
        reason: e.to_string(),
    })?;
    Ok(label)
}
