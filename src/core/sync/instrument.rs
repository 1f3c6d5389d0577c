/*!
 * Instrumentation Hooks
 *
 * Every wait/notify transition of the lock family reports a [`Location`]
 * through [`Instrument::at`]. Deterministic interleaving tests plug in an
 * implementation that records the location and can hold a thread there, and
 * swap in a condition variable they control. The production
 * [`Uninstrumented`] hooks compile to nothing.
 */

use super::traits::BlockingCondvar;
use parking_lot::Condvar;

/// Named transition points inside the lock algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Location {
    /// Unique fast path failed; entering the slow path
    UniqueContended,
    /// About to wait for the unique lock
    UniqueWait,
    /// Returned from a unique wait (possibly spuriously)
    UniqueWoken,
    /// Rarely-unique: the uniq field was set to "want", scan follows
    UniqueWant,
    /// Rarely-unique: the unique lock was granted
    UniqueAcquired,
    /// Rarely-unique: `try_lock` gave up
    TryUniqueFailed,
    /// Rarely-unique: `unlock` finished, including notifications
    UniqueReleased,

    /// Rarely-unique: shared lock granted on the fast path
    SharedFastPath,
    /// Shared fast path failed; entering the slow path
    SharedContended,
    /// About to wait for a shared lock
    SharedWait,
    /// Returned from a shared wait (possibly spuriously)
    SharedWoken,
    /// Rarely-unique: `try_lock_shared` gave up
    TrySharedFailed,

    /// Rarely-unique: start of `unlock_shared`
    UnlockSharedBegin,
    /// Rarely-unique: `unlock_shared` saw a writer wanting the lock
    UnlockSharedSlow,
    /// Rarely-unique: slow `unlock_shared` reached a definitive state
    UnlockSharedDone,

    /// Notifying a unique waiter
    NotifyUnique,
    /// Notifying shared waiters
    NotifyShared,
    /// Waiters are stranded on an idle lock; notifying again after a yield
    NotifyRetry,

    /// Polling variant: backing off before retrying
    Spin,

    /// Rarely-unique: this thread's node was linked into a lock's registry
    NodeRegistered,
    /// Rarely-unique: this thread's node was unlinked at thread exit
    NodeDeregistered,
    /// Rarely-unique: a thread exited with its sharing flag still set
    NodeAbandoned,

    /// Reported by instrumented condition variables when a waiter parks
    CondvarWait,
    /// Reported by instrumented condition variables when a waiter resumes
    CondvarWoken,
}

/// Injectable hooks for the lock algorithms
pub trait Instrument: 'static {
    /// Condition variable used by blocking waits
    type Condvar: BlockingCondvar;

    /// Called at every transition point
    #[inline(always)]
    fn at(location: Location) {
        let _ = location;
    }
}

/// Production hooks: `parking_lot` condition variables, no reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct Uninstrumented;

impl Instrument for Uninstrumented {
    type Condvar = Condvar;
}
