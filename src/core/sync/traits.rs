/*!
 * Synchronization Traits
 *
 * The uniform operation surface shared by every lock variant, and the seam
 * through which the condition variable implementation is injected.
 *
 * # Design: Unsafe Release
 *
 * Releasing a lock the caller does not hold is a contract violation, not a
 * recoverable error. `unlock` and `unlock_shared` are therefore `unsafe fn`
 * (as in `lock_api`); the RAII guards in [`super::guard`] are the safe way
 * to pair acquisitions with releases.
 */

use parking_lot::{Condvar, MutexGuard};

/// Shared/exclusive mutual exclusion
///
/// Implementations must guarantee:
/// - **Mutual exclusion**: a unique holder excludes every other holder
/// - **Shared concurrency**: any number of shared holders while no unique
///   lock is held or wanted
/// - **Writer priority**: once a unique request is pending, shared requests
///   that arrive later are not admitted before it
///
/// None of the operations are reentrant.
pub trait SharedMutex {
    /// Acquire the unique lock, waiting as long as necessary
    fn lock(&self);

    /// Acquire the unique lock only if that is possible without waiting
    fn try_lock(&self) -> bool;

    /// Release the unique lock
    ///
    /// # Safety
    ///
    /// The calling context must hold the unique lock.
    unsafe fn unlock(&self);

    /// Acquire a shared lock, waiting as long as necessary
    ///
    /// # Panics
    ///
    /// The rarely-unique variant keeps shared locks in thread-local state
    /// and panics when called from a thread-local destructor that runs after
    /// that state was torn down. `try_lock_shared` returns `false` instead.
    fn lock_shared(&self);

    /// Acquire a shared lock only if that is possible without waiting
    fn try_lock_shared(&self) -> bool;

    /// Release a shared lock
    ///
    /// # Safety
    ///
    /// The calling context must hold a shared lock. For the rarely-unique
    /// variant the release must also happen on the acquiring thread.
    unsafe fn unlock_shared(&self);
}

/// Condition variable used by the blocking wait paths
///
/// Implementations only need to be safe for one notifier at a time: the
/// locks never call `notify_one`/`notify_all` concurrently on the same
/// instance. Spurious returns from `wait` are allowed; every caller re-checks
/// its condition.
pub trait BlockingCondvar: Send + Sync + 'static {
    /// A fresh condition variable, for `const` lock construction
    const INIT: Self;

    /// Atomically release the guarded mutex and wait; the mutex is re-locked
    /// before returning
    fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>);

    /// Wake one waiter, if any
    fn notify_one(&self);

    /// Wake every waiter
    fn notify_all(&self);
}

impl BlockingCondvar for Condvar {
    const INIT: Self = Condvar::new();

    #[inline]
    fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        Condvar::wait(self, guard);
    }

    #[inline]
    fn notify_one(&self) {
        let _ = Condvar::notify_one(self);
    }

    #[inline]
    fn notify_all(&self) {
        let _ = Condvar::notify_all(self);
    }
}
