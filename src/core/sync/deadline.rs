/*!
 * Timed Acquisition
 *
 * Deadlines layered over `try_lock` / `try_lock_shared`. Attempts are
 * separated by a [`Backoff`]; once that is exhausted the caller sleeps in
 * short slices so the deadline is not overshot by much.
 *
 * Timed callers never set wait bits, so they do not take part in writer
 * priority: a timed writer can be overtaken by readers arriving later.
 */

use super::spinwait::Backoff;
use super::traits::SharedMutex;
use crate::core::errors::{LockError, LockResult};
use crate::core::limits::MAX_TIMED_RETRY_SLEEP;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Retry `attempt` until it succeeds or `deadline` passes
fn retry_until(deadline: Instant, mut attempt: impl FnMut() -> bool) -> LockResult<()> {
    let start = Instant::now();
    let mut backoff = Backoff::default();
    loop {
        if attempt() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            let waited = now.saturating_duration_since(start);
            trace!(?waited, "timed lock acquisition expired");
            return Err(LockError::Timeout(waited));
        }

        if backoff.is_completed() {
            thread::sleep((deadline - now).min(MAX_TIMED_RETRY_SLEEP));
        } else {
            backoff.snooze();
        }
    }
}

/// Acquire the unique lock, giving up at `deadline`
pub fn try_lock_until<M: SharedMutex + ?Sized>(mutex: &M, deadline: Instant) -> LockResult<()> {
    retry_until(deadline, || mutex.try_lock())
}

/// Acquire the unique lock, giving up after `timeout`
///
/// A timeout too large to represent waits without limit.
pub fn try_lock_for<M: SharedMutex + ?Sized>(mutex: &M, timeout: Duration) -> LockResult<()> {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => try_lock_until(mutex, deadline),
        None => {
            mutex.lock();
            Ok(())
        }
    }
}

/// Acquire a shared lock, giving up at `deadline`
pub fn try_lock_shared_until<M: SharedMutex + ?Sized>(
    mutex: &M,
    deadline: Instant,
) -> LockResult<()> {
    retry_until(deadline, || mutex.try_lock_shared())
}

/// Acquire a shared lock, giving up after `timeout`
///
/// A timeout too large to represent waits without limit.
pub fn try_lock_shared_for<M: SharedMutex + ?Sized>(
    mutex: &M,
    timeout: Duration,
) -> LockResult<()> {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => try_lock_shared_until(mutex, deadline),
        None => {
            mutex.lock_shared();
            Ok(())
        }
    }
}
