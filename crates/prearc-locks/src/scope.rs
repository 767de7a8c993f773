//! Scoped acquisition.
//!
//! A [`LockScope`] belongs to one unit of work. Every token it acquires is
//! released exactly once: explicitly through [`LockScope::release`], or when
//! the scope is dropped (normal return, `?` propagation or panic unwind).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{LockError, LockResult};
use crate::policy::{Discipline, LockPolicy};
use crate::shutdown::ShutdownSignal;
use crate::token::LockToken;
use crate::traits::LockRegistry;

pub struct LockScope {
    registry: Arc<dyn LockRegistry>,
    policy: LockPolicy,
    shutdown: ShutdownSignal,
    held: Vec<LockToken>,
}

impl std::fmt::Debug for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockScope").field("held", &self.held).finish()
    }
}

impl LockScope {
    pub fn new(registry: Arc<dyn LockRegistry>, policy: LockPolicy, shutdown: ShutdownSignal) -> Self {
        Self {
            registry,
            policy,
            shutdown,
            held: Vec::new(),
        }
    }

    /// Acquire using the discipline the policy assigns to the token's class.
    pub fn acquire(&mut self, token: LockToken) -> LockResult<()> {
        match self.policy.discipline_for(token.class()) {
            Discipline::FailFast => self.try_acquire(token),
            Discipline::Backoff { interval, max_wait } => {
                self.acquire_with_backoff(token, interval, max_wait)
            }
        }
    }

    /// Fail-fast acquisition: `Err(Contended)` if anyone holds the token.
    /// Re-acquiring a token this scope already holds is a no-op.
    pub fn try_acquire(&mut self, token: LockToken) -> LockResult<()> {
        if self.holds(&token) {
            return Ok(());
        }
        if self.registry.try_acquire(&token)? {
            debug!(token = %token, "lock acquired");
            self.held.push(token);
            Ok(())
        } else {
            debug!(token = %token, "lock contended");
            Err(LockError::Contended { token })
        }
    }

    /// Poll the registry, sleeping `interval` between attempts, until the
    /// token is free, `max_wait` elapses or shutdown is signalled.
    pub fn acquire_with_backoff(
        &mut self,
        token: LockToken,
        interval: Duration,
        max_wait: Option<Duration>,
    ) -> LockResult<()> {
        if self.holds(&token) {
            return Ok(());
        }
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.registry.try_acquire(&token)? {
                debug!(token = %token, attempt, "lock acquired");
                self.held.push(token);
                return Ok(());
            }
            let waited = start.elapsed();
            if let Some(limit) = max_wait {
                if waited >= limit {
                    return Err(LockError::TimedOut { token, waited });
                }
            }
            debug!(token = %token, attempt, ?interval, "lock held elsewhere; backing off");
            if self.shutdown.wait_timeout(interval) {
                return Err(LockError::Interrupted { token });
            }
        }
    }

    /// Release one token early. Unknown tokens are ignored.
    pub fn release(&mut self, token: &LockToken) -> LockResult<()> {
        if let Some(pos) = self.held.iter().position(|t| t == token) {
            let token = self.held.remove(pos);
            self.registry.release(&token)?;
            debug!(token = %token, "lock released");
        }
        Ok(())
    }

    /// Release everything in reverse acquisition order. Every token is
    /// attempted even if an earlier release fails; the first error is returned.
    pub fn release_all(&mut self) -> LockResult<()> {
        let mut first_err = None;
        while let Some(token) = self.held.pop() {
            match self.registry.release(&token) {
                Ok(_) => debug!(token = %token, "lock released"),
                Err(e) => {
                    warn!(token = %token, error = %e, "failed to release lock");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn holds(&self, token: &LockToken) -> bool {
        self.held.contains(token)
    }

    pub fn held(&self) -> &[LockToken] {
        &self.held
    }
}

impl Drop for LockScope {
    fn drop(&mut self) {
        let _ = self.release_all();
    }
}
