use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::SessionStatus;

/// A named action that can be requested against a staging session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Archive,
    Delete,
    Move,
    Rebuild,
    Separate,
    Import,
}

impl Operation {
    /// The status that marks a session while a worker has accepted but not
    /// started this operation. `Import` has none.
    pub fn queued_status(&self) -> Option<SessionStatus> {
        match self {
            Self::Archive => Some(SessionStatus::QueuedArchiving),
            Self::Delete => Some(SessionStatus::QueuedDeleting),
            Self::Move => Some(SessionStatus::QueuedMoving),
            Self::Rebuild => Some(SessionStatus::QueuedBuilding),
            Self::Separate => Some(SessionStatus::QueuedSeparating),
            Self::Import => None,
        }
    }

    /// Reverse lookup: which operation a queued status belongs to.
    pub fn for_queued_status(status: SessionStatus) -> Option<Operation> {
        [
            Self::Archive,
            Self::Delete,
            Self::Move,
            Self::Rebuild,
            Self::Separate,
        ]
        .into_iter()
        .find(|op| op.queued_status() == Some(status))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Archive => "archive",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rebuild => "rebuild",
            Self::Separate => "separate",
            Self::Import => "import",
        };
        f.write_str(name)
    }
}
