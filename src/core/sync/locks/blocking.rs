/*!
 * Blocking Shared Mutex
 *
 * General-purpose shared/exclusive lock: one control word plus two wait
 * groups (shared waiters, unique waiters).
 *
 * # Protocol
 *
 * - Fast paths are single CAS operations on the control word
 * - A thread that cannot get the lock sets the wait bit for its kind and
 *   waits in that kind's group, re-validating the word after every wake
 * - A release that leaves a wait bit set runs the notify protocol: wake one
 *   unique waiter if any (writer priority), otherwise all shared waiters
 *
 * Notifications are not issued under the wait-group mutex, so a wake can
 * race ahead of the waiter actually parking. The notify protocol covers
 * this by retrying, with a yield in between, for as long as some waiter
 * could proceed but nobody is bound to wake it: waiters stranded on an idle
 * lock, or readers still parked while no writer holds or wants the lock.
 * Otherwise the next release takes over the duty.
 */

use crate::core::hints::{likely, unlikely};
use crate::core::sync::config::SyncConfig;
use crate::core::sync::control::{AtomicControl, ControlWord};
use crate::core::sync::instrument::{Instrument, Location, Uninstrumented};
use crate::core::sync::spinwait::Backoff;
use crate::core::sync::traits::SharedMutex;
use crate::core::sync::wait_group::WaitGroup;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::trace;

/// Shared mutex that blocks contended callers on condition variables
///
/// Waiting writers are preferred over waiting readers. Among waiting
/// writers no order is guaranteed.
///
/// # Examples
///
/// ```
/// use shared_locks::{BlockingSharedMutex, SharedMutexExt};
///
/// static LOCK: BlockingSharedMutex = BlockingSharedMutex::new();
///
/// let a = LOCK.read();
/// let b = LOCK.read();
/// assert!(!LOCK.try_lock());
/// drop((a, b));
/// let _w = LOCK.write();
/// ```
pub struct BlockingSharedMutex<I: Instrument = Uninstrumented> {
    control: AtomicControl,
    /// Each group guards the count of its callers inside the slow path
    shared_waiters: WaitGroup<I::Condvar, u32>,
    unique_waiters: WaitGroup<I::Condvar, u32>,
    config: SyncConfig,
    _instrument: PhantomData<fn() -> I>,
}

impl<I: Instrument> BlockingSharedMutex<I> {
    /// Create an unlocked mutex with the default configuration
    pub const fn new() -> Self {
        Self::with_config(SyncConfig::new())
    }

    /// Create an unlocked mutex with the given wait configuration
    pub const fn with_config(config: SyncConfig) -> Self {
        Self {
            control: AtomicControl::new(),
            shared_waiters: WaitGroup::new(0),
            unique_waiters: WaitGroup::new(0),
            config,
            _instrument: PhantomData,
        }
    }

    /// Acquire the unique lock only if the lock is idle
    ///
    /// Fails while anyone holds the lock or waits for it.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let word = self.control.load(Ordering::Relaxed);
        word == ControlWord::IDLE
            && self
                .control
                .compare_exchange(word, word.with_unique_lock(), Ordering::Acquire)
                .is_ok()
    }

    /// Acquire the unique lock, blocking while it is held
    #[inline]
    pub fn lock(&self) {
        if likely(self.try_lock()) {
            return;
        }
        self.lock_slow();
    }

    /// Release the unique lock
    ///
    /// # Safety
    ///
    /// The unique lock must be held by the calling context.
    #[inline]
    pub unsafe fn unlock(&self) {
        let word = self.control.release_unique();
        if unlikely(word.has_waiters()) {
            self.notify_waiters(word);
        }
    }

    /// Acquire a shared lock unless a writer holds or wants the lock
    #[inline]
    pub fn try_lock_shared(&self) -> bool {
        self.control.try_acquire_shared()
    }

    /// Acquire a shared lock, blocking while a writer holds or wants it
    #[inline]
    pub fn lock_shared(&self) {
        if likely(self.try_lock_shared()) {
            return;
        }
        self.lock_shared_slow();
    }

    /// Release a shared lock
    ///
    /// # Safety
    ///
    /// A shared lock must be held by the calling context.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        let word = self.control.release_shared();
        if unlikely(word.has_waiters()) {
            self.notify_waiters(word);
        }
    }

    #[cold]
    fn lock_slow(&self) {
        I::at(Location::UniqueContended);
        trace!("writer entering blocking path");

        let strategy = self.config.select_strategy();
        let mut backoff = Backoff::from_config(&self.config);
        let mut pending = self.unique_waiters.lock();
        *pending += 1;

        let mut word = self.control.load(Ordering::Relaxed);
        loop {
            if !word.is_held() {
                // Keep warning readers off while other writers are parked
                let goal = if *pending == 1 {
                    word.with_unique_lock().without_unique_wait()
                } else {
                    word.with_unique_lock().with_unique_wait()
                };
                match self
                    .control
                    .compare_exchange_weak(word, goal, Ordering::Acquire)
                {
                    Ok(_) => break,
                    Err(actual) => {
                        word = actual;
                        continue;
                    }
                }
            }

            if !word.is_unique_wanted() {
                if let Err(actual) = self.control.compare_exchange_weak(
                    word,
                    word.with_unique_wait(),
                    Ordering::Relaxed,
                ) {
                    word = actual;
                    continue;
                }
            }

            I::at(Location::UniqueWait);
            self.unique_waiters.wait(&mut pending, strategy, &mut backoff);
            I::at(Location::UniqueWoken);
            word = self.control.load(Ordering::Relaxed);
        }

        *pending -= 1;
    }

    #[cold]
    fn lock_shared_slow(&self) {
        I::at(Location::SharedContended);
        trace!("reader entering blocking path");

        let strategy = self.config.select_strategy();
        let mut backoff = Backoff::from_config(&self.config);
        let mut pending = self.shared_waiters.lock();
        *pending += 1;

        let mut word = self.control.load(Ordering::Relaxed);
        loop {
            if !word.blocks_shared() {
                // The last reader out of the slow path clears the bit
                let goal = if *pending == 1 {
                    word.with_shared_acquired().without_shared_wait()
                } else {
                    word.with_shared_acquired().with_shared_wait()
                };
                match self
                    .control
                    .compare_exchange_weak(word, goal, Ordering::Acquire)
                {
                    Ok(_) => break,
                    Err(actual) => {
                        word = actual;
                        continue;
                    }
                }
            }

            if !word.is_shared_waiting() {
                if let Err(actual) = self.control.compare_exchange_weak(
                    word,
                    word.with_shared_wait(),
                    Ordering::Relaxed,
                ) {
                    word = actual;
                    continue;
                }
            }

            I::at(Location::SharedWait);
            self.shared_waiters.wait(&mut pending, strategy, &mut backoff);
            I::at(Location::SharedWoken);
            word = self.control.load(Ordering::Relaxed);
        }

        *pending -= 1;
    }

    #[cold]
    fn notify_waiters(&self, mut word: ControlWord) {
        loop {
            if word.is_unique_wanted() {
                I::at(Location::NotifyUnique);
                self.unique_waiters.try_notify_one();
            } else if word.is_shared_waiting() {
                I::at(Location::NotifyShared);
                self.shared_waiters.try_notify_all();
            }

            word = self.control.load(Ordering::Relaxed);
            if !word.has_admissible_waiters() {
                return;
            }

            I::at(Location::NotifyRetry);
            thread::yield_now();
            word = self.control.load(Ordering::Relaxed);
            if !word.has_admissible_waiters() {
                return;
            }
        }
    }

    #[cfg(test)]
    fn word(&self) -> ControlWord {
        self.control.load(Ordering::SeqCst)
    }
}

impl<I: Instrument> Default for BlockingSharedMutex<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Instrument> fmt::Debug for BlockingSharedMutex<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSharedMutex")
            .field("control", &self.control)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<I: Instrument> SharedMutex for BlockingSharedMutex<I> {
    #[inline]
    fn lock(&self) {
        BlockingSharedMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        BlockingSharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        BlockingSharedMutex::unlock(self)
    }

    #[inline]
    fn lock_shared(&self) {
        BlockingSharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        BlockingSharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        BlockingSharedMutex::unlock_shared(self)
    }
}

unsafe impl<I: Instrument> lock_api::RawRwLock for BlockingSharedMutex<I> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        BlockingSharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        BlockingSharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        BlockingSharedMutex::unlock_shared(self)
    }

    #[inline]
    fn lock_exclusive(&self) {
        BlockingSharedMutex::lock(self)
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        BlockingSharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        BlockingSharedMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.control.load(Ordering::Relaxed).is_held()
    }
}

/// Data-carrying reader-writer lock built on [`BlockingSharedMutex`]
pub type BlockingRwLock<T> = lock_api::RwLock<BlockingSharedMutex, T>;
