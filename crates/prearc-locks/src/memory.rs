//! In-process lock registry.
//!
//! [`InMemoryLockRegistry`] keeps held tokens in a `HashMap` behind a `Mutex`.
//! It is process-scoped: two processes sharing a prearchive each see only
//! their own locks. An optional lease TTL lets it stand in for a distributed
//! TTL-based store in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{LockError, LockResult};
use crate::token::LockToken;
use crate::traits::LockRegistry;

/// An in-memory implementation of [`LockRegistry`].
#[derive(Debug)]
pub struct InMemoryLockRegistry {
    held: Mutex<HashMap<LockToken, Instant>>,
    ttl: Option<Duration>,
}

impl InMemoryLockRegistry {
    /// Create an empty registry whose locks never expire.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Create a registry whose locks lapse after `ttl` unless released.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    fn lock_map(&self) -> LockResult<std::sync::MutexGuard<'_, HashMap<LockToken, Instant>>> {
        self.held
            .lock()
            .map_err(|e| LockError::Poisoned(format!("lock poisoned: {e}")))
    }

    fn is_live(&self, acquired: &Instant, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(*acquired) < ttl,
            None => true,
        }
    }
}

impl Default for InMemoryLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry for InMemoryLockRegistry {
    fn try_acquire(&self, token: &LockToken) -> LockResult<bool> {
        let now = Instant::now();
        let mut held = self.lock_map()?;
        if let Some(acquired) = held.get(token) {
            if self.is_live(acquired, now) {
                return Ok(false);
            }
            debug!(token = %token, "lease expired; reclaiming");
        }
        held.insert(token.clone(), now);
        Ok(true)
    }

    fn release(&self, token: &LockToken) -> LockResult<bool> {
        let mut held = self.lock_map()?;
        Ok(held.remove(token).is_some())
    }

    fn is_held(&self, token: &LockToken) -> LockResult<bool> {
        let now = Instant::now();
        let held = self.lock_map()?;
        Ok(held
            .get(token)
            .map(|acquired| self.is_live(acquired, now))
            .unwrap_or(false))
    }

    fn held(&self) -> LockResult<Vec<LockToken>> {
        let now = Instant::now();
        let held = self.lock_map()?;
        let mut tokens: Vec<LockToken> = held
            .iter()
            .filter(|(_, acquired)| self.is_live(acquired, now))
            .map(|(token, _)| token.clone())
            .collect();
        tokens.sort();
        Ok(tokens)
    }
}
