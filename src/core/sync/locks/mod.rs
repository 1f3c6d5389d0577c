/*!
 * Shared Mutex Variants
 *
 * Three implementations of the same shared/exclusive contract:
 * - **Blocking**: control word plus condition-variable wait groups
 * - **Polling**: control word only; waiters spin and yield
 * - **Rarely-unique**: per-thread sharing flags, for read-dominated use
 */

mod blocking;
mod polling;
mod rarely_unique;

// Re-export public API
pub use blocking::{BlockingRwLock, BlockingSharedMutex};
pub use polling::{PollingRwLock, PollingSharedMutex};
pub use rarely_unique::{
    FlagBlock, FlagSupplier, IsolatedFlags, LockId, PackedFlags, RuSharedMutex, SharingFlag,
};
