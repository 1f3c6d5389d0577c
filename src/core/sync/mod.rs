/*!
 * Synchronization Primitives
 *
 * A family of shared/exclusive mutexes with one operation surface
 * ([`SharedMutex`]) and different waiting machinery underneath.
 *
 * # Architecture
 *
 * - `control`: bit-packed control word shared by the blocking and polling
 *   variants
 * - `wait_group`: condition variable plus reentrancy guard, with
 *   strategy-aware waiting
 * - `instrument`: named transition points, a no-op in production
 * - `locks`: the three variants
 * - `guard` / `deadline`: RAII guards and timed acquisition on top of any
 *   variant
 *
 * # Performance
 *
 * - Uncontended operations are a single CAS (blocking, polling) or a flag
 *   store plus a load (rarely-unique)
 * - Hot atomics are cache-line aligned to prevent false sharing
 * - Hooks and wait strategies are monomorphized away
 */

mod config;
mod control;
mod deadline;
mod guard;
mod instrument;
mod locks;
mod spinwait;
mod traits;
mod wait_group;

pub use config::{StrategyType, SyncConfig};
pub use deadline::{try_lock_for, try_lock_shared_for, try_lock_shared_until, try_lock_until};
pub use guard::{ExclusiveGuard, SharedGuard, SharedMutexExt};
pub use instrument::{Instrument, Location, Uninstrumented};
pub use locks::{
    BlockingRwLock, BlockingSharedMutex, FlagBlock, FlagSupplier, IsolatedFlags, LockId,
    PackedFlags, PollingRwLock, PollingSharedMutex, RuSharedMutex, SharingFlag,
};
pub use spinwait::Backoff;
pub use traits::{BlockingCondvar, SharedMutex};
