//! Audit / workflow log.
//!
//! Every transfer into the archive opens a record, adds steps as it goes and
//! ends complete or failed. An open record on a target blocks a new merge
//! into it unless the caller overrides.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{poisoned, ServiceError, ServiceResult};

/// Justification recorded when the caller supplies none.
pub const DEFAULT_JUSTIFICATION: &str = "standard upload";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    #[default]
    Transfer,
    Merge,
    Import,
}

/// What is being audited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub principal: String,
    /// Target identifier (archive session id).
    pub target: String,
    pub action: String,
    pub category: EventCategory,
    pub justification: String,
}

impl AuditEntry {
    pub fn new(principal: &str, target: &str, action: &str) -> Self {
        Self {
            principal: principal.to_string(),
            target: target.to_string(),
            action: action.to_string(),
            category: EventCategory::default(),
            justification: DEFAULT_JUSTIFICATION.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum AuditStatus {
    Open,
    Complete,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub entry: AuditEntry,
    pub status: AuditStatus,
    pub steps: Vec<String>,
    pub opened: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
}

pub trait AuditLog: Send + Sync {
    fn open(&self, entry: AuditEntry) -> ServiceResult<Uuid>;
    fn step(&self, id: Uuid, message: &str) -> ServiceResult<()>;
    fn complete(&self, id: Uuid) -> ServiceResult<()>;
    fn fail(&self, id: Uuid, message: &str) -> ServiceResult<()>;
    /// Whether any record on `target` is still open.
    fn has_open(&self, target: &str) -> ServiceResult<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> ServiceResult<Vec<AuditRecord>> {
        Ok(self.records.lock().map_err(poisoned)?.clone())
    }

    fn with_record<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut AuditRecord) -> T,
    ) -> ServiceResult<T> {
        let mut records = self.records.lock().map_err(poisoned)?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ServiceError::UnknownAuditRecord(id.to_string()))?;
        Ok(f(record))
    }
}

impl AuditLog for InMemoryAuditLog {
    fn open(&self, entry: AuditEntry) -> ServiceResult<Uuid> {
        let id = Uuid::now_v7();
        debug!(%id, target = %entry.target, action = %entry.action, "audit record opened");
        self.records.lock().map_err(poisoned)?.push(AuditRecord {
            id,
            entry,
            status: AuditStatus::Open,
            steps: Vec::new(),
            opened: Utc::now(),
            closed: None,
        });
        Ok(id)
    }

    fn step(&self, id: Uuid, message: &str) -> ServiceResult<()> {
        self.with_record(id, |r| r.steps.push(message.to_string()))
    }

    fn complete(&self, id: Uuid) -> ServiceResult<()> {
        self.with_record(id, |r| {
            r.status = AuditStatus::Complete;
            r.closed = Some(Utc::now());
        })
    }

    fn fail(&self, id: Uuid, message: &str) -> ServiceResult<()> {
        warn!(%id, message, "audit record failed");
        self.with_record(id, |r| {
            r.status = AuditStatus::Failed(message.to_string());
            r.closed = Some(Utc::now());
        })
    }

    fn has_open(&self, target: &str) -> ServiceResult<bool> {
        Ok(self
            .records
            .lock()
            .map_err(poisoned)?
            .iter()
            .any(|r| r.entry.target == target && r.status == AuditStatus::Open))
    }
}
