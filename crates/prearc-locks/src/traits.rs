//! The [`LockRegistry`] trait defining the lock backend interface.

use crate::error::LockResult;
use crate::token::LockToken;

/// Backend for mutually-exclusive tokens.
///
/// Implementations must be thread-safe (`Send + Sync`). `try_acquire` is an
/// atomic check-and-insert: of any number of concurrent calls for one token,
/// at most one returns `true` until the token is released.
///
/// The registry does not record owners; [`crate::LockScope`] is responsible
/// for releasing exactly the tokens it acquired.
pub trait LockRegistry: Send + Sync {
    /// Try to take the token. Returns `Ok(false)` if it is already held.
    fn try_acquire(&self, token: &LockToken) -> LockResult<bool>;

    /// Release the token. Returns `Ok(true)` if it was held.
    fn release(&self, token: &LockToken) -> LockResult<bool>;

    /// Whether the token is currently held by anyone.
    fn is_held(&self, token: &LockToken) -> LockResult<bool>;

    /// All currently held tokens, sorted.
    fn held(&self) -> LockResult<Vec<LockToken>>;
}
