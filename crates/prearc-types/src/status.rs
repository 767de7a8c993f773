//! Staging session lifecycle.
//!
//! ```text
//! RECEIVING <-> READY -> QUEUED_{BUILDING,ARCHIVING,MOVING,DELETING,SEPARATING}
//!                              -> IN_PROGRESS -> COMPLETE | FAILED | CONFLICT
//! ```
//!
//! A session in a `QUEUED_*` state has been accepted by an asynchronous worker
//! that has not started yet; no second operation may be queued against it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Lifecycle state of a staging session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Objects are still arriving.
    Receiving,
    /// Idle and complete from the sender's point of view.
    Ready,
    QueuedBuilding,
    QueuedArchiving,
    QueuedMoving,
    QueuedDeleting,
    QueuedSeparating,
    /// A worker is running an operation against the session.
    InProgress,
    /// The operation finished; archived sessions are removed right after.
    Complete,
    /// The last operation failed for a non-conflict reason.
    Failed,
    /// The last archive attempt stopped on an identity conflict.
    Conflict,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 11] = [
        Self::Receiving,
        Self::Ready,
        Self::QueuedBuilding,
        Self::QueuedArchiving,
        Self::QueuedMoving,
        Self::QueuedDeleting,
        Self::QueuedSeparating,
        Self::InProgress,
        Self::Complete,
        Self::Failed,
        Self::Conflict,
    ];

    /// Returns `true` for any `QUEUED_*` state.
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            Self::QueuedBuilding
                | Self::QueuedArchiving
                | Self::QueuedMoving
                | Self::QueuedDeleting
                | Self::QueuedSeparating
        )
    }

    /// Queued or in progress: another operation must not be started.
    pub fn is_busy(&self) -> bool {
        self.is_queued() || *self == Self::InProgress
    }

    /// Whether newly received objects may join a session in this state.
    pub fn accepts_objects(&self) -> bool {
        matches!(self, Self::Receiving | Self::Ready)
    }

    /// Returns `true` if a transition from `self` to `to` is legal.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, to) {
            (Receiving, Receiving | Ready | InProgress | Failed) => true,
            (Ready, Receiving | InProgress) => true,
            (Receiving | Ready | Failed | Conflict, next) if next.is_queued() => true,
            (from, InProgress | Ready | Failed) if from.is_queued() => true,
            (InProgress, Complete | Failed | Conflict | Ready) => true,
            (Failed | Conflict, Ready | InProgress) => true,
            _ => false,
        }
    }

    /// Apply a transition, rejecting illegal ones.
    pub fn transition(self, to: SessionStatus) -> Result<SessionStatus, TypeError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TypeError::IllegalTransition { from: self, to })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiving => "RECEIVING",
            Self::Ready => "READY",
            Self::QueuedBuilding => "QUEUED_BUILDING",
            Self::QueuedArchiving => "QUEUED_ARCHIVING",
            Self::QueuedMoving => "QUEUED_MOVING",
            Self::QueuedDeleting => "QUEUED_DELETING",
            Self::QueuedSeparating => "QUEUED_SEPARATING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Conflict => "CONFLICT",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiving_ready_round_trip() {
        assert!(SessionStatus::Receiving.can_transition_to(SessionStatus::Ready));
        assert!(SessionStatus::Ready.can_transition_to(SessionStatus::Receiving));
    }

    #[test]
    fn queued_only_from_idle_states() {
        for status in SessionStatus::ALL {
            let allowed = status.can_transition_to(SessionStatus::QueuedArchiving);
            let idle = matches!(
                status,
                SessionStatus::Receiving
                    | SessionStatus::Ready
                    | SessionStatus::Failed
                    | SessionStatus::Conflict
            );
            assert_eq!(allowed, idle, "{status} -> QUEUED_ARCHIVING");
        }
    }

    #[test]
    fn cannot_double_queue() {
        let err = SessionStatus::QueuedMoving
            .transition(SessionStatus::QueuedArchiving)
            .unwrap_err();
        assert_eq!(
            err,
            TypeError::IllegalTransition {
                from: SessionStatus::QueuedMoving,
                to: SessionStatus::QueuedArchiving,
            }
        );
    }

    #[test]
    fn complete_is_terminal() {
        for to in SessionStatus::ALL {
            assert!(!SessionStatus::Complete.can_transition_to(to));
        }
    }

    #[test]
    fn in_progress_outcomes() {
        let s = SessionStatus::InProgress;
        assert!(s.can_transition_to(SessionStatus::Complete));
        assert!(s.can_transition_to(SessionStatus::Failed));
        assert!(s.can_transition_to(SessionStatus::Conflict));
        assert!(!s.can_transition_to(SessionStatus::Receiving));
    }

    #[test]
    fn busy_states_reject_objects() {
        for status in SessionStatus::ALL {
            if status.is_busy() {
                assert!(!status.accepts_objects());
            }
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            "queued_archiving".parse::<SessionStatus>().unwrap(),
            SessionStatus::QueuedArchiving
        );
        assert!("bogus".parse::<SessionStatus>().is_err());
    }
}
