//! Session resolution.
//!
//! Every accepted object is routed to exactly one staging session. The
//! resolver builds a candidate from the object's identifiers and the caller's
//! overrides and hands it to the store's atomic find-or-create; concurrent
//! objects of one study therefore join the same session whatever order they
//! arrive in.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use prearc_dicom::{ObjectInfo, RoutingIdentifiers};
use prearc_store::{Resolved, StagingStore};
use prearc_types::{sanitize_label, RoutingOverrides, StagingSession, StorageTarget};

use crate::error::{StagingError, StagingResult};

#[derive(Clone, Debug)]
pub struct ResolverSettings {
    pub prearchive_root: PathBuf,
    /// Root of the direct-to-archive area; `None` disables the fast path.
    pub direct_root: Option<PathBuf>,
    /// Minimum age of `last_modified` before another object rewrites it.
    pub refresh_interval: Duration,
    /// Include the modality in the dedup key.
    pub separate_by_modality: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            prearchive_root: PathBuf::from("prearchive"),
            direct_root: None,
            refresh_interval: Duration::seconds(15),
            separate_by_modality: false,
        }
    }
}

/// Inputs for one resolution.
#[derive(Clone, Copy, Debug)]
pub struct ResolveRequest<'a> {
    /// Destination project, already merged from override and derivation.
    pub project: Option<&'a str>,
    pub identifiers: &'a RoutingIdentifiers,
    pub info: &'a ObjectInfo,
    pub overrides: &'a RoutingOverrides,
}

pub struct SessionResolver {
    staging: Arc<dyn StagingStore>,
    direct: Option<Arc<dyn StagingStore>>,
    settings: ResolverSettings,
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("direct", &self.direct.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl SessionResolver {
    pub fn new(staging: Arc<dyn StagingStore>, settings: ResolverSettings) -> Self {
        Self {
            staging,
            direct: None,
            settings,
        }
    }

    /// Enable the direct-to-archive fast path, backed by its own store.
    pub fn with_direct_store(mut self, direct: Arc<dyn StagingStore>) -> Self {
        self.direct = Some(direct);
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// The store that owns sessions with the given target.
    pub fn store_for(&self, target: StorageTarget) -> &Arc<dyn StagingStore> {
        match (target, &self.direct) {
            (StorageTarget::DirectArchive, Some(direct)) => direct,
            _ => &self.staging,
        }
    }

    /// Build the candidate session for an object without touching the store.
    pub fn candidate(&self, request: &ResolveRequest<'_>) -> StagingResult<StagingSession> {
        let study_uid = request
            .info
            .study_instance_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .ok_or(StagingError::MissingStudyUid)?;

        let label = request
            .overrides
            .session
            .as_deref()
            .or(request.identifiers.session.as_deref())
            .map(sanitize_label)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| sanitize_label(study_uid));

        let mut session = StagingSession::new(
            request.project.map(str::to_string),
            label,
            study_uid,
            self.settings.prearchive_root.clone(),
        );
        session.subject = request
            .overrides
            .subject
            .clone()
            .or_else(|| request.identifiers.subject.clone());
        session.modality = request.info.modality.clone();
        session.visit = request.overrides.visit.clone();
        session.source = request.overrides.source.clone();
        session.prevent_anonymization = request.overrides.pre_anonymized;
        session.prevent_auto_commit = request.overrides.custom_processing;
        session.separated_by_modality = self.settings.separate_by_modality;
        Ok(session)
    }

    /// Find or create the session the object belongs to. Existing sessions
    /// get a throttled modification refresh.
    pub fn resolve(&self, request: &ResolveRequest<'_>) -> StagingResult<Resolved> {
        let candidate = self.candidate(request)?;

        let resolved = if request.overrides.direct_archive {
            self.resolve_direct(candidate)?
        } else {
            self.staging.find_or_create(candidate)?
        };

        match resolved {
            Resolved::Created(session) => {
                info!(
                    session = %session.locator(),
                    uid = %session.study_instance_uid,
                    target = ?session.target,
                    "new session"
                );
                Ok(Resolved::Created(session))
            }
            Resolved::Existing(session) => {
                let store = self.store_for(session.target);
                let touched =
                    store.touch(&session.locator(), Utc::now(), self.settings.refresh_interval)?;
                debug!(session = %touched.locator(), "joined existing session");
                Ok(Resolved::Existing(touched))
            }
        }
    }

    /// Direct-to-archive fast path with fallback to staging. The root is
    /// re-pointed on the candidate before anything is written.
    fn resolve_direct(&self, mut candidate: StagingSession) -> StagingResult<Resolved> {
        let (Some(direct), Some(root)) = (&self.direct, &self.settings.direct_root) else {
            warn!(uid = %candidate.study_instance_uid, "direct archive unavailable, staging instead");
            return Ok(self.staging.find_or_create(candidate)?);
        };

        let mut direct_candidate = candidate.clone();
        direct_candidate.root = root.clone();
        direct_candidate.target = StorageTarget::DirectArchive;
        match direct.find_or_create(direct_candidate) {
            Ok(resolved) => Ok(resolved),
            Err(e) if e.is_transient() => {
                warn!(error = %e, uid = %candidate.study_instance_uid, "direct archive failed, staging instead");
                candidate.root = self.settings.prearchive_root.clone();
                candidate.target = StorageTarget::Prearchive;
                Ok(self.staging.find_or_create(candidate)?)
            }
            Err(e) => Err(StagingError::Store(e)),
        }
    }
}
