//! Site configuration.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! prearchive_root = "/data/prearchive"
//! archive_root = "/data/archive"
//! archive_timeout_secs = 600
//!
//! [identifiers]
//! project_tags = ["(0008,1030)"]
//!
//! [projects.P1]
//! quarantine_code = "quarantine"
//! auto_archive = true
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prearc_dicom::{FilterConfig, IdentifierRules, ProgressiveFilter, TagFilter, TransferSyntax};
use prearc_locks::LockPolicy;
use prearc_merge::MergeSettings;
use prearc_staging::{ResolverSettings, WriterSettings};
use prearc_store::{ProjectRecord, QuarantineCode};

use crate::error::{SdkError, SdkResult};

/// Per-project settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project-level import filter, applied after the site filter.
    pub filter: Option<FilterConfig>,
    pub quarantine_code: QuarantineCode,
    /// Skip study UID consistency and uniqueness checks.
    pub uid_check_opt_out: bool,
    /// Queue an archive for sessions of this project after a batch import,
    /// or once they have been idle for `auto_archive_idle_secs`.
    pub auto_archive: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Prefix of minted archive ids.
    pub site_id: String,
    pub inbox_path: PathBuf,
    pub prearchive_root: PathBuf,
    pub archive_root: PathBuf,
    pub failed_root: PathBuf,
    /// Root for direct-to-archive sessions; unset disables the fast path.
    pub direct_archive_root: Option<PathBuf>,
    pub archive_timeout_secs: u64,
    pub allow_cross_modality_merge: bool,
    pub require_unique_study_uid: bool,
    pub correct_scan_ids: bool,
    pub default_transfer_syntax: TransferSyntax,
    pub decompress_on_write: bool,
    pub anonymize: bool,
    pub separate_sessions_by_modality: bool,
    pub refresh_interval_secs: u64,
    /// Quiet period after which an auto-archiving session is queued.
    pub auto_archive_idle_secs: u64,
    pub subject_lock_retry_secs: u64,
    pub subject_retry_delay_ms: u64,
    pub identifiers: IdentifierRules,
    pub site_filter: Option<FilterConfig>,
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_id: "PREARC".into(),
            inbox_path: PathBuf::from("inbox"),
            prearchive_root: PathBuf::from("prearchive"),
            archive_root: PathBuf::from("archive"),
            failed_root: PathBuf::from("failed"),
            direct_archive_root: None,
            archive_timeout_secs: 300,
            allow_cross_modality_merge: false,
            require_unique_study_uid: true,
            correct_scan_ids: true,
            default_transfer_syntax: TransferSyntax::ExplicitVrLittleEndian,
            decompress_on_write: false,
            anonymize: false,
            separate_sessions_by_modality: false,
            refresh_interval_secs: 15,
            auto_archive_idle_secs: 120,
            subject_lock_retry_secs: 10,
            subject_retry_delay_ms: 500,
            identifiers: IdentifierRules::default(),
            site_filter: None,
            projects: BTreeMap::new(),
        }
    }
}

impl SiteConfig {
    pub fn from_toml(text: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| SdkError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> SdkResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rebase every relative path onto `base`.
    pub fn rooted_at(mut self, base: &Path) -> Self {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.inbox_path);
        rebase(&mut self.prearchive_root);
        rebase(&mut self.archive_root);
        rebase(&mut self.failed_root);
        if let Some(direct) = self.direct_archive_root.as_mut() {
            rebase(direct);
        }
        self
    }

    fn check(&self) -> SdkResult<()> {
        if self.site_id.trim().is_empty() {
            return Err(SdkError::InvalidConfig("site_id must not be empty".into()));
        }
        if self.archive_timeout_secs == 0 {
            return Err(SdkError::InvalidConfig("archive_timeout_secs must be positive".into()));
        }
        if self.auto_archive_idle_secs <= self.refresh_interval_secs {
            return Err(SdkError::InvalidConfig(
                "auto_archive_idle_secs must exceed refresh_interval_secs".into(),
            ));
        }
        if self.prearchive_root == self.archive_root {
            return Err(SdkError::InvalidConfig(
                "prearchive_root and archive_root must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    pub fn auto_archive_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auto_archive_idle_secs as i64)
    }

    pub fn project(&self, id: &str) -> Option<&ProjectConfig> {
        self.projects.get(id)
    }

    pub fn project_records(&self) -> impl Iterator<Item = ProjectRecord> + '_ {
        self.projects.iter().map(|(id, p)| ProjectRecord {
            id: id.clone(),
            quarantine_code: p.quarantine_code,
            uid_check_opt_out: p.uid_check_opt_out,
        })
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            subject_interval: Duration::from_secs(self.subject_lock_retry_secs),
            ..LockPolicy::default()
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            prearchive_root: self.prearchive_root.clone(),
            direct_root: self.direct_archive_root.clone(),
            refresh_interval: chrono::Duration::seconds(self.refresh_interval_secs as i64),
            separate_by_modality: self.separate_sessions_by_modality,
        }
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            anonymize: self.anonymize,
            decompress_on_write: self.decompress_on_write,
            target_syntax: self.default_transfer_syntax.clone(),
        }
    }

    pub fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            archive_root: self.archive_root.clone(),
            failed_root: self.failed_root.clone(),
            allow_cross_modality_merge: self.allow_cross_modality_merge,
            require_unique_study_uid: self.require_unique_study_uid,
            correct_scan_ids: self.correct_scan_ids,
            subject_retry_delay: Duration::from_millis(self.subject_retry_delay_ms),
        }
    }

    /// Site and project filters plus identifier rules.
    pub fn build_filter(&self) -> SdkResult<ProgressiveFilter> {
        let mut filter = ProgressiveFilter::new(self.identifiers.clone());
        if let Some(site) = &self.site_filter {
            filter = filter.with_site_filter(Arc::new(TagFilter::from_config(site)?));
        }
        for (id, project) in &self.projects {
            if let Some(config) = &project.filter {
                filter = filter.with_project_filter(id.clone(), Arc::new(TagFilter::from_config(config)?));
            }
        }
        Ok(filter)
    }
}
