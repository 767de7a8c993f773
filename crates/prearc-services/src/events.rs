//! Archive events and post-merge hooks.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{poisoned, ServiceResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveEventKind {
    Created,
    Updated,
}

/// Published after a merged session record is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEvent {
    pub kind: ArchiveEventKind,
    pub project: String,
    pub session_id: String,
    pub label: String,
}

/// Notification and cache-invalidation channel.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ArchiveEvent) -> ServiceResult<()>;

    /// Drop any cached views of the session.
    fn invalidate(&self, project: &str, session_id: &str) -> ServiceResult<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn publish(&self, _event: &ArchiveEvent) -> ServiceResult<()> {
        Ok(())
    }

    fn invalidate(&self, _project: &str, _session_id: &str) -> ServiceResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ArchiveEvent>>,
    invalidated: Mutex<Vec<String>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> ServiceResult<Vec<ArchiveEvent>> {
        Ok(self.events.lock().map_err(poisoned)?.clone())
    }

    /// Session ids whose caches were invalidated, in call order.
    pub fn invalidated(&self) -> ServiceResult<Vec<String>> {
        Ok(self.invalidated.lock().map_err(poisoned)?.clone())
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &ArchiveEvent) -> ServiceResult<()> {
        self.events.lock().map_err(poisoned)?.push(event.clone());
        Ok(())
    }

    fn invalidate(&self, _project: &str, session_id: &str) -> ServiceResult<()> {
        self.invalidated
            .lock()
            .map_err(poisoned)?
            .push(session_id.to_string());
        Ok(())
    }
}

/// Summary handed to post-merge hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSummary {
    pub project: String,
    pub session_id: String,
    pub label: String,
    pub created: bool,
    pub scans: usize,
}

/// Extension point run after a successful merge, once locks are released.
/// Failures are logged by the caller, never propagated.
pub trait MergeHook: Send + Sync {
    fn after_merge(&self, summary: &MergeSummary) -> ServiceResult<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpHook;

impl MergeHook for NoOpHook {
    fn after_merge(&self, _summary: &MergeSummary) -> ServiceResult<()> {
        Ok(())
    }
}
