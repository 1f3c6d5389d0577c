/*!
 * Error Types
 * Error handling for the lock helpers built on top of the raw operations
 *
 * The six core lock operations never fail: `try_lock`/`try_lock_shared`
 * report contention as `false` and everything else blocks or spins until it
 * succeeds. Only the timed and guard-returning helpers surface errors.
 */

use std::time::Duration;
use thiserror::Error;

/// Result type for guard-returning and timed lock helpers
pub type LockResult<T> = Result<T, LockError>;

/// Lock acquisition errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lock is held in a conflicting mode")]
    WouldBlock,
}

impl LockError {
    /// Check if this error is a timeout
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout(_))
    }
}
