/*!
 * Scoped Lock Guards
 *
 * RAII guards pairing every acquisition with exactly one release.
 *
 * ## Example
 *
 * ```
 * use shared_locks::{PollingSharedMutex, SharedMutexExt};
 *
 * let mutex: PollingSharedMutex = PollingSharedMutex::new();
 * {
 *     let _a = mutex.read();
 *     let _b = mutex.read();
 *     assert!(mutex.try_write().is_err());
 * }
 * let guard = mutex.write();
 * guard.unlock();
 * ```
 *
 * Guards are `!Send`: a rarely-unique shared lock is recorded in a flag of
 * the acquiring thread and has to be released there. The same restriction
 * is applied to every variant so code can switch variants freely.
 */

use super::deadline;
use super::traits::SharedMutex;
use crate::core::errors::{LockError, LockResult};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::time::Duration;

/// Marker making a guard `!Send` and `!Sync`
type NotSend = PhantomData<*const ()>;

/// Holds the unique lock until dropped
#[must_use = "if unused the lock is released immediately"]
pub struct ExclusiveGuard<'a, M: SharedMutex + ?Sized> {
    mutex: &'a M,
    _not_send: NotSend,
}

impl<'a, M: SharedMutex + ?Sized> ExclusiveGuard<'a, M> {
    /// Wrap a unique lock the caller already holds
    ///
    /// # Safety
    ///
    /// The calling context must hold the unique lock of `mutex` and hand
    /// its release over to the guard.
    #[inline]
    pub unsafe fn adopt(mutex: &'a M) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    /// The guarded mutex
    #[inline]
    pub fn mutex(&self) -> &'a M {
        self.mutex
    }

    /// Release the lock now
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }

    /// Keep the lock held past the guard; the caller takes over the release
    #[inline]
    pub fn leak(self) -> &'a M {
        let mutex = self.mutex;
        mem::forget(self);
        mutex
    }
}

impl<M: SharedMutex + ?Sized> Drop for ExclusiveGuard<'_, M> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: constructed only while holding the unique lock
        unsafe { self.mutex.unlock() };
    }
}

impl<M: SharedMutex + ?Sized> fmt::Debug for ExclusiveGuard<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveGuard").finish_non_exhaustive()
    }
}

/// Holds a shared lock until dropped
#[must_use = "if unused the lock is released immediately"]
pub struct SharedGuard<'a, M: SharedMutex + ?Sized> {
    mutex: &'a M,
    _not_send: NotSend,
}

impl<'a, M: SharedMutex + ?Sized> SharedGuard<'a, M> {
    /// Wrap a shared lock the caller already holds
    ///
    /// # Safety
    ///
    /// The calling context must hold a shared lock of `mutex` and hand its
    /// release over to the guard.
    #[inline]
    pub unsafe fn adopt(mutex: &'a M) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    /// The guarded mutex
    #[inline]
    pub fn mutex(&self) -> &'a M {
        self.mutex
    }

    /// Release the lock now
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }

    /// Keep the lock held past the guard; the caller takes over the release
    #[inline]
    pub fn leak(self) -> &'a M {
        let mutex = self.mutex;
        mem::forget(self);
        mutex
    }
}

impl<M: SharedMutex + ?Sized> Drop for SharedGuard<'_, M> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: constructed only while holding a shared lock
        unsafe { self.mutex.unlock_shared() };
    }
}

impl<M: SharedMutex + ?Sized> fmt::Debug for SharedGuard<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedGuard").finish_non_exhaustive()
    }
}

/// Guard-returning acquisition for every [`SharedMutex`]
pub trait SharedMutexExt: SharedMutex {
    /// Acquire the unique lock
    #[inline]
    fn write(&self) -> ExclusiveGuard<'_, Self> {
        self.lock();
        // SAFETY: just acquired
        unsafe { ExclusiveGuard::adopt(self) }
    }

    /// Acquire a shared lock
    #[inline]
    fn read(&self) -> SharedGuard<'_, Self> {
        self.lock_shared();
        // SAFETY: just acquired
        unsafe { SharedGuard::adopt(self) }
    }

    /// Acquire the unique lock without waiting
    #[inline]
    fn try_write(&self) -> LockResult<ExclusiveGuard<'_, Self>> {
        if self.try_lock() {
            // SAFETY: just acquired
            Ok(unsafe { ExclusiveGuard::adopt(self) })
        } else {
            Err(LockError::WouldBlock)
        }
    }

    /// Acquire a shared lock without waiting
    #[inline]
    fn try_read(&self) -> LockResult<SharedGuard<'_, Self>> {
        if self.try_lock_shared() {
            // SAFETY: just acquired
            Ok(unsafe { SharedGuard::adopt(self) })
        } else {
            Err(LockError::WouldBlock)
        }
    }

    /// Acquire the unique lock, giving up after `timeout`
    fn try_write_for(&self, timeout: Duration) -> LockResult<ExclusiveGuard<'_, Self>> {
        deadline::try_lock_for(self, timeout)?;
        // SAFETY: just acquired
        Ok(unsafe { ExclusiveGuard::adopt(self) })
    }

    /// Acquire a shared lock, giving up after `timeout`
    fn try_read_for(&self, timeout: Duration) -> LockResult<SharedGuard<'_, Self>> {
        deadline::try_lock_shared_for(self, timeout)?;
        // SAFETY: just acquired
        Ok(unsafe { SharedGuard::adopt(self) })
    }
}

impl<M: SharedMutex + ?Sized> SharedMutexExt for M {}
