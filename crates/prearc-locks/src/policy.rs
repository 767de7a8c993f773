use std::time::Duration;

use crate::token::LockClass;

/// How an acquisition reacts to a token that is already held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    /// Reject immediately as a duplicate operation in progress.
    FailFast,
    /// Sleep `interval` between attempts until the holder finishes. With no
    /// `max_wait` the loop only ends on success or shutdown.
    Backoff {
        interval: Duration,
        max_wait: Option<Duration>,
    },
}

/// Discipline per token class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockPolicy {
    /// Wait between subject-creation attempts.
    pub subject_interval: Duration,
    /// Upper bound on a subject-creation wait (`None` waits indefinitely).
    pub subject_max_wait: Option<Duration>,
    /// Wait between catalog-rewrite attempts.
    pub catalog_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            subject_interval: Duration::from_secs(10),
            subject_max_wait: None,
            catalog_interval: Duration::from_millis(5),
        }
    }
}

impl LockPolicy {
    pub fn discipline_for(&self, class: LockClass) -> Discipline {
        match class {
            LockClass::Subject => Discipline::Backoff {
                interval: self.subject_interval,
                max_wait: self.subject_max_wait,
            },
            LockClass::Catalog => Discipline::Backoff {
                interval: self.catalog_interval,
                max_wait: None,
            },
            LockClass::Staging | LockClass::Destination | LockClass::ScanFile | LockClass::Other => {
                Discipline::FailFast
            }
        }
    }
}
