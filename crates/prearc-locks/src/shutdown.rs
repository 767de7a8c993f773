use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cooperative shutdown flag that can interrupt a backoff wait.
///
/// Clones share state. Triggering wakes every waiter immediately.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag shutdown and wake all waiters.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        if let Ok(mut triggered) = flag.lock() {
            *triggered = true;
        }
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        flag.lock().map(|t| *t).unwrap_or(true)
    }

    /// Sleep for up to `timeout`. Returns `true` if shutdown was triggered
    /// before or during the wait. A poisoned flag counts as shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let Ok(guard) = flag.lock() else {
            return true;
        };
        match cvar.wait_timeout_while(guard, timeout, |triggered| !*triggered) {
            Ok((triggered, _)) => *triggered,
            Err(_) => true,
        }
    }
}
