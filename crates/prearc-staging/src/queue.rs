use std::collections::BTreeMap;

use tracing::{info, warn};

use prearc_services::{Dispatcher, OperationRequest, Principal};
use prearc_store::{StagingStore, StoreError};
use prearc_types::{Operation, SessionLocator, SessionStatus, TypeError};

use crate::error::{StagingError, StagingResult};

/// Mark a session with the operation's QUEUED status and hand the request to
/// the dispatcher. The status flag, not the transport, decides whether an
/// operation is already pending; a dispatcher failure restores the previous
/// status.
pub fn queue_operation(
    store: &dyn StagingStore,
    dispatcher: &dyn Dispatcher,
    principal: &Principal,
    locator: &SessionLocator,
    operation: Operation,
    params: BTreeMap<String, String>,
) -> StagingResult<SessionStatus> {
    let queued = operation
        .queued_status()
        .ok_or(StagingError::NotQueueable(operation))?;
    let before = store
        .get(locator)?
        .ok_or_else(|| StagingError::SessionNotFound(locator.clone()))?;

    match store.transition(locator, queued) {
        Ok(_) => {}
        Err(StoreError::Type(TypeError::IllegalTransition { from, .. })) => {
            return Err(StagingError::AlreadyQueued {
                session: locator.clone(),
                status: from,
                operation,
            });
        }
        Err(StoreError::NotFound { .. }) => {
            return Err(StagingError::SessionNotFound(locator.clone()))
        }
        Err(e) => return Err(e.into()),
    }

    let request = OperationRequest {
        operation,
        session: locator.clone(),
        principal: principal.name.clone(),
        params,
    };
    if let Err(e) = dispatcher.enqueue(&request) {
        warn!(session = %locator, %operation, error = %e, "dispatch failed, restoring status");
        if let Some(mut current) = store.get(locator)? {
            current.status = before.status;
            store.update(&current)?;
        }
        return Err(e.into());
    }
    info!(session = %locator, %operation, status = %queued, "operation queued");
    Ok(queued)
}
