/*!
 * Polling Shared Mutex
 *
 * Control word only: contended callers spin and yield instead of sleeping.
 * Suited to short critical sections where a context switch costs more than
 * the wait itself.
 *
 * The shared-wait bit is never used. A waiting writer sets the unique-wait
 * bit so new readers stay out; the bit is dropped when any writer wins the
 * lock, and re-set by writers still polling on their next round.
 */

use crate::core::sync::config::SyncConfig;
use crate::core::sync::control::{AtomicControl, ControlWord};
use crate::core::sync::instrument::{Instrument, Location, Uninstrumented};
use crate::core::sync::spinwait::Backoff;
use crate::core::sync::traits::SharedMutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

/// Shared mutex that polls the control word while contended
///
/// Waiting writers are preferred over newly arriving readers, on a
/// best-effort basis once several writers wait: the winning writer clears
/// the unique-wait bit, and a reader arriving after its release but before
/// another waiting writer re-sets the bit is admitted first.
pub struct PollingSharedMutex<I: Instrument = Uninstrumented> {
    control: AtomicControl,
    config: SyncConfig,
    _instrument: PhantomData<fn() -> I>,
}

impl<I: Instrument> PollingSharedMutex<I> {
    /// Create an unlocked mutex
    pub const fn new() -> Self {
        Self::with_config(SyncConfig::new())
    }

    /// Create an unlocked mutex; only the spin and yield limits are used
    pub const fn with_config(config: SyncConfig) -> Self {
        Self {
            control: AtomicControl::new(),
            config,
            _instrument: PhantomData,
        }
    }

    /// Acquire the unique lock if nobody holds the lock
    ///
    /// A pending unique-wait bit does not prevent success; it is cleared.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let word = self.control.load(Ordering::Relaxed);
        !word.is_held()
            && self
                .control
                .compare_exchange(word, ControlWord::IDLE.with_unique_lock(), Ordering::Acquire)
                .is_ok()
    }

    /// Acquire the unique lock, polling while it is held
    pub fn lock(&self) {
        let mut backoff = Backoff::from_config(&self.config);
        let mut word = self.control.load(Ordering::Relaxed);
        loop {
            if !word.is_held() {
                match self.control.compare_exchange_weak(
                    word,
                    ControlWord::IDLE.with_unique_lock(),
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
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

            I::at(Location::Spin);
            backoff.snooze();
            word = self.control.load(Ordering::Relaxed);
        }
    }

    /// Release the unique lock
    ///
    /// # Safety
    ///
    /// The unique lock must be held by the calling context.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.control.release_unique();
    }

    /// Acquire a shared lock unless a writer holds or wants the lock
    #[inline]
    pub fn try_lock_shared(&self) -> bool {
        self.control.try_acquire_shared()
    }

    /// Acquire a shared lock, polling while a writer holds or wants it
    pub fn lock_shared(&self) {
        let mut backoff = Backoff::from_config(&self.config);
        while !self.try_lock_shared() {
            I::at(Location::Spin);
            backoff.snooze();
        }
    }

    /// Release a shared lock
    ///
    /// # Safety
    ///
    /// A shared lock must be held by the calling context.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        self.control.release_shared();
    }

    #[cfg(test)]
    fn word(&self) -> ControlWord {
        self.control.load(Ordering::SeqCst)
    }
}

impl<I: Instrument> Default for PollingSharedMutex<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Instrument> fmt::Debug for PollingSharedMutex<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingSharedMutex")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl<I: Instrument> SharedMutex for PollingSharedMutex<I> {
    #[inline]
    fn lock(&self) {
        PollingSharedMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        PollingSharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        PollingSharedMutex::unlock(self)
    }

    #[inline]
    fn lock_shared(&self) {
        PollingSharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        PollingSharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        PollingSharedMutex::unlock_shared(self)
    }
}

unsafe impl<I: Instrument> lock_api::RawRwLock for PollingSharedMutex<I> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        PollingSharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        PollingSharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        PollingSharedMutex::unlock_shared(self)
    }

    #[inline]
    fn lock_exclusive(&self) {
        PollingSharedMutex::lock(self)
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        PollingSharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        PollingSharedMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.control.load(Ordering::Relaxed).is_held()
    }
}

/// Data-carrying reader-writer lock built on [`PollingSharedMutex`]
pub type PollingRwLock<T> = lock_api::RwLock<PollingSharedMutex, T>;
