/*!
 * Rarely-Unique Shared Mutex
 *
 * Shared/exclusive lock for read-dominated workloads. Taking a shared lock
 * is a store to a flag owned by the calling thread plus one load of the
 * mutex's `uniq` field: no read-modify-write on shared memory. Exclusive
 * acquisition pays for it by scanning the flags of every registered thread.
 *
 * # Protocol
 *
 * `uniq` is a tri-state (`No`, `Want`, `Yes`) only written by the thread
 * holding `uniq_mtx`:
 *
 * - **Reader**: set own flag, then load `uniq`. On `No` the lock is held.
 * - **Writer**: take `uniq_mtx`, store `Want`, then scan all flags. If every
 *   flag is clear, store `Yes` and keep `uniq_mtx` until `unlock`.
 *
 * Both sides store before they load (sequentially consistent), so a reader
 * and a writer racing on the fast path cannot both miss each other.
 *
 * A reader that finds `uniq != No` clears its flag and waits for the writer
 * under `uniq_mtx`. A reader that releases while a writer wants the lock
 * keeps notifying the writer until it has either seen the drain or a new
 * flag went up. A thread that exits without releasing its shared lock gets
 * the same hand-off from its registry node.
 *
 * # Thread Affinity
 *
 * A shared lock lives in a flag of the acquiring thread, so it must be
 * released on that thread. The guards returned by
 * [`SharedMutexExt`](crate::SharedMutexExt) are `!Send` for this reason.
 */

mod flags;
mod registry;

pub use flags::{FlagBlock, FlagSupplier, IsolatedFlags, PackedFlags, SharingFlag};
pub use registry::LockId;

use crate::core::hints::likely;
use crate::core::sync::config::SyncConfig;
use crate::core::sync::instrument::{Instrument, Location, Uninstrumented};
use crate::core::sync::spinwait::Backoff;
use crate::core::sync::traits::{BlockingCondvar, SharedMutex};
use crate::core::sync::wait_group::Signal;
use parking_lot::Mutex;
use registry::{with_flag, Registration, ThreadRegistry};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::trace;

/// State of the exclusive side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Uniq {
    /// No writer holds or wants the lock
    No = 0,
    /// A writer waits for readers to drain
    Want = 1,
    /// A writer holds the lock
    Yes = 2,
}

struct AtomicUniq(AtomicU8);

impl AtomicUniq {
    const fn new() -> Self {
        Self(AtomicU8::new(Uniq::No as u8))
    }

    #[inline(always)]
    fn load(&self) -> Uniq {
        match self.0.load(Ordering::SeqCst) {
            0 => Uniq::No,
            1 => Uniq::Want,
            _ => Uniq::Yes,
        }
    }

    #[inline(always)]
    fn store(&self, value: Uniq) {
        self.0.store(value as u8, Ordering::SeqCst);
    }
}

/// Writer-side state, also reachable from the registry's abandon hook
struct UniqueSide<C> {
    uniq: AtomicUniq,
    wait: Signal<C>,
}

impl<C: BlockingCondvar> UniqueSide<C> {
    fn new() -> Self {
        Self {
            uniq: AtomicUniq::new(),
            wait: Signal::new(),
        }
    }

    #[inline]
    fn notify(&self, report: fn(Location)) {
        report(Location::NotifyUnique);
        self.wait.notify_one();
    }

    /// Prod a writer in `Want` after a flag was cleared
    ///
    /// The writer may already have seen the drain; keep prodding until the
    /// state says so one way or the other.
    fn hand_off(&self, registry: &ThreadRegistry, config: &SyncConfig, report: fn(Location)) {
        report(Location::UnlockSharedSlow);
        let mut backoff = Backoff::from_config(config);

        while registry.all_clear(true) {
            self.notify(report);
            if self.uniq.load() != Uniq::Want || !registry.all_clear(true) {
                break;
            }
            backoff.snooze();
        }
        report(Location::UnlockSharedDone);
    }
}

/// Shared mutex with a per-thread flag on the shared path
///
/// `S` decides how sharing flags are laid out in memory, `I` injects test
/// hooks. Unlike the other variants, construction allocates, so statics go
/// through a lazily initialised cell.
///
/// # Examples
///
/// ```
/// use shared_locks::{RuSharedMutex, SharedMutexExt};
/// use std::sync::OnceLock;
///
/// fn config_lock() -> &'static RuSharedMutex {
///     static LOCK: OnceLock<RuSharedMutex> = OnceLock::new();
///     LOCK.get_or_init(RuSharedMutex::new)
/// }
///
/// {
///     let _r = config_lock().read();
///     assert!(!config_lock().try_lock());
/// }
/// let _w = config_lock().write();
/// ```
pub struct RuSharedMutex<S: FlagSupplier = IsolatedFlags, I: Instrument = Uninstrumented> {
    id: LockId,
    registry: Arc<ThreadRegistry>,
    unique: Arc<UniqueSide<I::Condvar>>,
    /// Held by the writer for the whole exclusive section
    uniq_mtx: Mutex<()>,
    wait_shared: Signal<I::Condvar>,
    config: SyncConfig,
    _marker: PhantomData<(fn() -> S, fn() -> I)>,
}

impl<S: FlagSupplier, I: Instrument> RuSharedMutex<S, I> {
    /// Create an unlocked mutex with the default configuration
    pub fn new() -> Self {
        Self::with_config(SyncConfig::new())
    }

    /// Create an unlocked mutex with the given wait configuration
    pub fn with_config(config: SyncConfig) -> Self {
        let id = LockId::next();
        let unique: Arc<UniqueSide<I::Condvar>> = Arc::new(UniqueSide::new());
        let abandoned_side = Arc::clone(&unique);
        // Runs in a thread-local destructor: no instrumentation past the
        // node event
        let registry = ThreadRegistry::new(id, move |registry| {
            if abandoned_side.uniq.load() == Uniq::Want {
                abandoned_side.hand_off(registry, &config, |_| {});
            }
        });

        Self {
            id,
            registry: Arc::new(registry),
            unique,
            uniq_mtx: Mutex::new(()),
            wait_shared: Signal::new(),
            config,
            _marker: PhantomData,
        }
    }

    /// Process-unique identity of this mutex
    #[inline]
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Number of threads currently registered with this mutex
    pub fn registered_threads(&self) -> usize {
        self.registry.len()
    }

    /// Acquire the unique lock, waiting for shared holders to drain
    pub fn lock(&self) {
        let mut guard = self.uniq_mtx.lock();
        let strategy = self.config.select_strategy();
        let mut backoff = Backoff::from_config(&self.config);

        let mut contended = false;
        loop {
            self.unique.uniq.store(Uniq::Want);
            I::at(Location::UniqueWant);
            if self.registry.all_clear(true) {
                break;
            }
            if !contended {
                contended = true;
                trace!(lock_id = %self.id, "writer waiting for readers to drain");
            }
            I::at(Location::UniqueWait);
            self.unique.wait.wait(&mut guard, strategy, &mut backoff);
            I::at(Location::UniqueWoken);
        }

        self.unique.uniq.store(Uniq::Yes);
        I::at(Location::UniqueAcquired);
        // Released by `unlock`
        mem::forget(guard);
    }

    /// Acquire the unique lock if no other writer is active and no thread
    /// holds a shared lock
    pub fn try_lock(&self) -> bool {
        let Some(guard) = self.uniq_mtx.try_lock() else {
            return false;
        };
        self.unique.uniq.store(Uniq::Want);
        I::at(Location::UniqueWant);
        mem::forget(guard);

        if !self.registry.all_clear(false) {
            I::at(Location::TryUniqueFailed);
            // A writer parked in `lock` may have seen our `Want`
            unsafe { self.release_unique() };
            return false;
        }

        self.unique.uniq.store(Uniq::Yes);
        I::at(Location::UniqueAcquired);
        true
    }

    /// Release the unique lock
    ///
    /// # Safety
    ///
    /// The unique lock must be held by the calling context.
    pub unsafe fn unlock(&self) {
        debug_assert_eq!(self.unique.uniq.load(), Uniq::Yes, "unlock without unique lock");
        self.release_unique();
        I::at(Location::UniqueReleased);
    }

    /// Acquire a shared lock
    ///
    /// # Panics
    ///
    /// Panics if called from a thread-local destructor after this thread's
    /// node map was torn down.
    #[inline]
    pub fn lock_shared(&self) {
        let admitted = self.with_flag(Registration::Blocking, |flag| {
            flag.set(true);
            if likely(self.unique.uniq.load() == Uniq::No) {
                I::at(Location::SharedFastPath);
                return;
            }
            self.lock_shared_slow(flag);
        });
        if admitted.is_none() {
            panic!("lock_shared called during thread teardown");
        }
    }

    /// Acquire a shared lock unless a writer holds or wants the lock
    ///
    /// Also fails on a thread's first use of this mutex if the registry is
    /// being modified concurrently, and during thread-local teardown.
    pub fn try_lock_shared(&self) -> bool {
        let admitted = self.with_flag(Registration::NonBlocking, |flag| {
            flag.set(true);
            self.unique.uniq.load() == Uniq::No
        });
        match admitted {
            Some(true) => true,
            Some(false) => {
                I::at(Location::TrySharedFailed);
                // Full release: a draining writer may be waiting on this flag
                unsafe { self.unlock_shared() };
                false
            }
            None => false,
        }
    }

    /// Release a shared lock
    ///
    /// # Safety
    ///
    /// A shared lock must be held by the calling thread.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        I::at(Location::UnlockSharedBegin);
        let released = self.with_flag(Registration::Existing, |flag| flag.set(false));
        debug_assert!(released.is_some(), "unlock_shared without shared lock");

        if likely(self.unique.uniq.load() != Uniq::Want) {
            return;
        }
        self.unlock_shared_slow();
    }

    #[inline(always)]
    fn with_flag<R>(
        &self,
        registration: Registration,
        f: impl FnOnce(&SharingFlag) -> R,
    ) -> Option<R> {
        with_flag(&self.registry, S::allocate, I::at, registration, f)
    }

    #[cold]
    fn lock_shared_slow(&self, flag: &SharingFlag) {
        I::at(Location::SharedContended);
        trace!(lock_id = %self.id, "reader entering slow path");

        let strategy = self.config.select_strategy();
        let mut backoff = Backoff::from_config(&self.config);
        let mut guard = self.uniq_mtx.lock();

        while self.unique.uniq.load() != Uniq::No {
            flag.set(false);
            // Our flag may have been the last one the writer waits for
            if self.unique.uniq.load() == Uniq::Want {
                self.notify_unique();
            }
            I::at(Location::SharedWait);
            self.wait_shared.wait(&mut guard, strategy, &mut backoff);
            I::at(Location::SharedWoken);
            flag.set(true);
        }
    }

    #[cold]
    fn unlock_shared_slow(&self) {
        self.unique.hand_off(&self.registry, &self.config, I::at);
    }

    /// Give up exclusivity: `uniq` back to `No`, readers woken, `uniq_mtx`
    /// released, one waiting writer woken
    ///
    /// # Safety
    ///
    /// `uniq_mtx` must be locked by the calling context with its guard
    /// forgotten.
    unsafe fn release_unique(&self) {
        self.unique.uniq.store(Uniq::No);
        I::at(Location::NotifyShared);
        self.wait_shared.notify_all();
        self.uniq_mtx.force_unlock();
        self.notify_unique();
    }

    #[inline]
    fn notify_unique(&self) {
        self.unique.notify(I::at);
    }
}

impl<S: FlagSupplier, I: Instrument> Default for RuSharedMutex<S, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FlagSupplier, I: Instrument> fmt::Debug for RuSharedMutex<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuSharedMutex")
            .field("id", &self.id)
            .field("uniq", &self.unique.uniq.load())
            .field("registered_threads", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<S: FlagSupplier, I: Instrument> SharedMutex for RuSharedMutex<S, I> {
    #[inline]
    fn lock(&self) {
        RuSharedMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        RuSharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        RuSharedMutex::unlock(self)
    }

    #[inline]
    fn lock_shared(&self) {
        RuSharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        RuSharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        RuSharedMutex::unlock_shared(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    type Mutex = RuSharedMutex;

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_uncontended_roundtrip() {
        let mutex = Mutex::new();
        mutex.lock_shared();
        assert_eq!(mutex.unique.uniq.load(), Uniq::No);
        assert!(!mutex.try_lock());
        assert_eq!(mutex.unique.uniq.load(), Uniq::No);
        unsafe { mutex.unlock_shared() };

        assert!(mutex.try_lock());
        assert_eq!(mutex.unique.uniq.load(), Uniq::Yes);
        unsafe { mutex.unlock() };
        assert_eq!(mutex.unique.uniq.load(), Uniq::No);

        mutex.lock();
        unsafe { mutex.unlock() };
        assert!(mutex.try_lock_shared());
        unsafe { mutex.unlock_shared() };
    }

    #[test]
    fn test_try_lock_shared_refused_under_writer() {
        let mutex = Arc::new(Mutex::new());
        mutex.lock();

        let other = mutex.clone();
        let refused = thread::spawn(move || other.try_lock_shared()).join().unwrap();
        assert!(!refused);

        unsafe { mutex.unlock() };
        let other = mutex.clone();
        let admitted = thread::spawn(move || {
            let admitted = other.try_lock_shared();
            if admitted {
                unsafe { other.unlock_shared() };
            }
            admitted
        })
        .join()
        .unwrap();
        assert!(admitted);
    }

    #[test]
    fn test_writer_waits_for_reader_drain() {
        let mutex = Arc::new(Mutex::new());
        let (a_locked_tx, a_locked_rx) = std::sync::mpsc::channel();
        let (a_release_tx, a_release_rx) = std::sync::mpsc::channel::<()>();

        // A: shared holder
        let a_mutex = mutex.clone();
        let a = thread::spawn(move || {
            a_mutex.lock_shared();
            a_locked_tx.send(()).unwrap();
            a_release_rx.recv().unwrap();
            unsafe { a_mutex.unlock_shared() };
        });
        a_locked_rx.recv().unwrap();

        // B: writer, blocked behind A
        let b_acquired = Arc::new(AtomicBool::new(false));
        let (b_release_tx, b_release_rx) = std::sync::mpsc::channel::<()>();
        let b_mutex = mutex.clone();
        let b_flag = b_acquired.clone();
        let b = thread::spawn(move || {
            b_mutex.lock();
            b_flag.store(true, Ordering::SeqCst);
            b_release_rx.recv().unwrap();
            unsafe { b_mutex.unlock() };
        });

        wait_for(|| mutex.unique.uniq.load() == Uniq::Want);
        assert!(!b_acquired.load(Ordering::SeqCst));

        a_release_tx.send(()).unwrap();
        a.join().unwrap();
        wait_for(|| b_acquired.load(Ordering::SeqCst));
        assert_eq!(mutex.unique.uniq.load(), Uniq::Yes);

        // C: refused while B holds, admitted after
        let c_mutex = mutex.clone();
        assert!(!thread::spawn(move || c_mutex.try_lock_shared()).join().unwrap());

        b_release_tx.send(()).unwrap();
        b.join().unwrap();

        let c_mutex = mutex.clone();
        let admitted = thread::spawn(move || {
            let admitted = c_mutex.try_lock_shared();
            if admitted {
                unsafe { c_mutex.unlock_shared() };
            }
            admitted
        })
        .join()
        .unwrap();
        assert!(admitted);
    }

    #[test]
    fn test_failed_try_lock_wakes_parked_writer() {
        let mutex = Arc::new(Mutex::new());
        mutex.lock_shared();

        let writer_mutex = mutex.clone();
        let writer = thread::spawn(move || {
            writer_mutex.lock();
            unsafe { writer_mutex.unlock() };
        });
        wait_for(|| mutex.unique.uniq.load() == Uniq::Want);

        // Fails on our own flag and hands the state back to the writer
        let other = mutex.clone();
        assert!(!thread::spawn(move || other.try_lock()).join().unwrap());

        unsafe { mutex.unlock_shared() };
        writer.join().unwrap();
        assert_eq!(mutex.unique.uniq.load(), Uniq::No);
    }

    #[test]
    fn test_thread_exit_while_shared_hands_off_to_writer() {
        let mutex = Arc::new(Mutex::with_config(SyncConfig::long_wait()));
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (exit_tx, exit_rx) = std::sync::mpsc::channel::<()>();

        // Holder leaks its shared lock and exits
        let holder_mutex = mutex.clone();
        let holder = thread::spawn(move || {
            holder_mutex.lock_shared();
            locked_tx.send(()).unwrap();
            exit_rx.recv().unwrap();
        });
        locked_rx.recv().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let writer_mutex = mutex.clone();
        let writer_flag = acquired.clone();
        let writer = thread::spawn(move || {
            writer_mutex.lock();
            writer_flag.store(true, Ordering::SeqCst);
            unsafe { writer_mutex.unlock() };
        });
        wait_for(|| mutex.unique.uniq.load() == Uniq::Want);
        assert!(!acquired.load(Ordering::SeqCst));

        exit_tx.send(()).unwrap();
        holder.join().unwrap();
        wait_for(|| acquired.load(Ordering::SeqCst));
        writer.join().unwrap();

        assert_eq!(mutex.registered_threads(), 0);
        assert!(mutex.try_lock());
        unsafe { mutex.unlock() };
    }

    #[test]
    fn test_registration_follows_thread_lifetime() {
        let mutex = Arc::new(Mutex::new());
        assert_eq!(mutex.registered_threads(), 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    mutex.lock_shared();
                    unsafe { mutex.unlock_shared() };
                    mutex.lock_shared();
                    unsafe { mutex.unlock_shared() };
                    mutex.registered_threads()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap() >= 1);
        }
        assert_eq!(mutex.registered_threads(), 0);

        // Never touching the shared side registers nothing
        let other = mutex.clone();
        thread::spawn(move || {
            other.lock();
            unsafe { other.unlock() };
        })
        .join()
        .unwrap();
        assert_eq!(mutex.registered_threads(), 0);
    }

    #[test]
    fn test_mutex_dropped_before_threads_exit() {
        let barrier = Arc::new(Barrier::new(3));
        let mutex = Arc::new(Mutex::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let mutex = mutex.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    mutex.lock_shared();
                    unsafe { mutex.unlock_shared() };
                    drop(mutex);
                    barrier.wait();
                    // Mutex is gone by now; the node must not touch it
                    barrier.wait();
                })
            })
            .collect();

        barrier.wait();
        assert_eq!(mutex.registered_threads(), 2);
        drop(mutex);
        barrier.wait();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_packed_supplier_locks() {
        let a = Arc::new(RuSharedMutex::<PackedFlags>::new());
        let b = Arc::new(RuSharedMutex::<PackedFlags>::new());
        let (a2, b2) = (a.clone(), b.clone());
        thread::spawn(move || {
            a2.lock_shared();
            b2.lock_shared();
            assert!(!a2.try_lock());
            unsafe { a2.unlock_shared() };
            // Flag of `b` in the same block must not block `a`
            assert!(a2.try_lock());
            unsafe {
                a2.unlock();
                b2.unlock_shared();
            }
        })
        .join()
        .unwrap();
        assert_eq!(a.registered_threads(), 0);
        assert_eq!(b.registered_threads(), 0);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let mutex = Arc::new(Mutex::new());
        let writers_inside = Arc::new(AtomicUsize::new(0));
        let readers_inside = Arc::new(AtomicUsize::new(0));
        let violation = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let mutex = mutex.clone();
                let writers_inside = writers_inside.clone();
                let readers_inside = readers_inside.clone();
                let violation = violation.clone();
                thread::spawn(move || {
                    for j in 0..1_000 {
                        if (i + j) % 7 == 0 {
                            mutex.lock();
                            if writers_inside.fetch_add(1, Ordering::SeqCst) != 0
                                || readers_inside.load(Ordering::SeqCst) != 0
                            {
                                violation.store(true, Ordering::SeqCst);
                            }
                            writers_inside.fetch_sub(1, Ordering::SeqCst);
                            unsafe { mutex.unlock() };
                        } else {
                            mutex.lock_shared();
                            readers_inside.fetch_add(1, Ordering::SeqCst);
                            if writers_inside.load(Ordering::SeqCst) != 0 {
                                violation.store(true, Ordering::SeqCst);
                            }
                            readers_inside.fetch_sub(1, Ordering::SeqCst);
                            unsafe { mutex.unlock_shared() };
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!violation.load(Ordering::SeqCst));
        assert_eq!(mutex.unique.uniq.load(), Uniq::No);
    }

    #[test]
    fn test_ids_are_distinct() {
        let a = Mutex::new();
        let b = Mutex::new();
        assert_ne!(a.id(), b.id());
    }
}
