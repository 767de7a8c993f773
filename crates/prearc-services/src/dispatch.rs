//! Asynchronous dispatch.
//!
//! Requests are fire-and-forget with at-least-once delivery. The staging
//! session's QUEUED status, not the transport, is the authority on whether an
//! operation is already pending.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use prearc_types::{Operation, SessionLocator};

use crate::error::{poisoned, ServiceError, ServiceResult};

/// A named operation against one staging session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation: Operation,
    pub session: SessionLocator,
    pub principal: String,
    pub params: BTreeMap<String, String>,
}

/// Follow-up work announced after a session is archived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamTrigger {
    pub project: String,
    pub session_id: String,
    pub created: bool,
}

pub trait Dispatcher: Send + Sync {
    fn enqueue(&self, request: &OperationRequest) -> ServiceResult<()>;

    fn trigger_downstream(&self, trigger: &DownstreamTrigger) -> ServiceResult<()>;
}

/// Drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpDispatcher;

impl Dispatcher for NoOpDispatcher {
    fn enqueue(&self, _request: &OperationRequest) -> ServiceResult<()> {
        Ok(())
    }

    fn trigger_downstream(&self, _trigger: &DownstreamTrigger) -> ServiceResult<()> {
        Ok(())
    }
}

/// Keeps every request in memory. Can be switched to reject new requests.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<OperationRequest>>,
    triggers: Mutex<Vec<DownstreamTrigger>>,
    reject: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `enqueue` calls fail (or succeed again).
    pub fn set_rejecting(&self, reject: bool) -> ServiceResult<()> {
        *self.reject.lock().map_err(poisoned)? = reject;
        Ok(())
    }

    pub fn requests(&self) -> ServiceResult<Vec<OperationRequest>> {
        Ok(self.requests.lock().map_err(poisoned)?.clone())
    }

    pub fn triggers(&self) -> ServiceResult<Vec<DownstreamTrigger>> {
        Ok(self.triggers.lock().map_err(poisoned)?.clone())
    }
}

impl Dispatcher for RecordingDispatcher {
    fn enqueue(&self, request: &OperationRequest) -> ServiceResult<()> {
        if *self.reject.lock().map_err(poisoned)? {
            return Err(ServiceError::Dispatch(format!(
                "queue unavailable for {} of {}",
                request.operation, request.session
            )));
        }
        debug!(operation = %request.operation, session = %request.session, "operation enqueued");
        self.requests.lock().map_err(poisoned)?.push(request.clone());
        Ok(())
    }

    fn trigger_downstream(&self, trigger: &DownstreamTrigger) -> ServiceResult<()> {
        self.triggers.lock().map_err(poisoned)?.push(trigger.clone());
        Ok(())
    }
}
