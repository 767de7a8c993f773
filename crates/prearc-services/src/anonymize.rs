use std::path::Path;

use crate::error::ServiceResult;

/// Identifiers handed to the anonymization script for one file.
#[derive(Clone, Copy, Debug)]
pub struct AnonymizationRequest<'a> {
    pub file: &'a Path,
    pub project: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub session: &'a str,
}

/// Rewrites a stored file in place. A failure makes the storage writer
/// remove the file again.
pub trait Anonymizer: Send + Sync {
    fn anonymize(&self, request: &AnonymizationRequest<'_>) -> ServiceResult<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpAnonymizer;

impl Anonymizer for NoOpAnonymizer {
    fn anonymize(&self, _request: &AnonymizationRequest<'_>) -> ServiceResult<()> {
        Ok(())
    }
}
