/*!
 * Wait Groups
 *
 * A [`Signal`] is a condition variable plus a reentrancy guard: an atomic
 * "notifier active" flag that keeps two threads from running a notify
 * operation on the same condition variable at once. A [`WaitGroup`] adds
 * the mutex that guards entry to the wait (and whatever bookkeeping that
 * mutex protects).
 *
 * # Design: Strategy-Aware Waiting
 *
 * Waiting honours the configured [`StrategyType`]:
 * - **Block**: park on the condition variable
 * - **Spin**: release the mutex, back off, re-lock
 * - **Adaptive**: spin while the backoff lasts, then park
 *
 * All three return to a caller that re-validates the lock state, so a
 * spinning return is just another spurious wakeup.
 */

use super::config::StrategyType;
use super::spinwait::Backoff;
use super::traits::BlockingCondvar;
use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Condition variable with a reentrancy guard
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
pub(crate) struct Signal<C> {
    cond: C,
    notifying: AtomicBool,
}

impl<C: BlockingCondvar> Signal<C> {
    pub(crate) const fn new() -> Self {
        Self {
            cond: C::INIT,
            notifying: AtomicBool::new(false),
        }
    }

    /// Wait according to `strategy`; the guard is re-locked on return
    pub(crate) fn wait<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        strategy: StrategyType,
        backoff: &mut Backoff,
    ) {
        let park = match strategy {
            StrategyType::Spin => false,
            StrategyType::Adaptive => backoff.is_completed(),
            StrategyType::Block | StrategyType::Auto => true,
        };

        if park {
            self.cond.wait(guard);
        } else {
            MutexGuard::unlocked(guard, || backoff.snooze());
        }
    }

    /// Wake one waiter unless another thread is notifying right now
    #[inline]
    pub(crate) fn try_notify_one(&self) -> bool {
        if !self.claim() {
            return false;
        }
        self.cond.notify_one();
        self.release();
        true
    }

    /// Wake all waiters unless another thread is notifying right now
    #[inline]
    pub(crate) fn try_notify_all(&self) -> bool {
        if !self.claim() {
            return false;
        }
        self.cond.notify_all();
        self.release();
        true
    }

    /// Wake one waiter, waiting out a concurrent notifier first
    pub(crate) fn notify_one(&self) {
        while !self.try_notify_one() {
            thread::yield_now();
        }
    }

    /// Wake all waiters, waiting out a concurrent notifier first
    pub(crate) fn notify_all(&self) {
        while !self.try_notify_all() {
            thread::yield_now();
        }
    }

    #[inline]
    fn claim(&self) -> bool {
        self.notifying
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn release(&self) {
        self.notifying.store(false, Ordering::Release);
    }
}

/// Signal plus the mutex guarding entry to its wait
pub(crate) struct WaitGroup<C, T> {
    signal: Signal<C>,
    mutex: Mutex<T>,
}

impl<C: BlockingCondvar, T> WaitGroup<C, T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            signal: Signal::new(),
            mutex: const_mutex(data),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock()
    }

    #[inline]
    pub(crate) fn wait(
        &self,
        guard: &mut MutexGuard<'_, T>,
        strategy: StrategyType,
        backoff: &mut Backoff,
    ) {
        self.signal.wait(guard, strategy, backoff);
    }

    #[inline]
    pub(crate) fn try_notify_one(&self) -> bool {
        self.signal.try_notify_one()
    }

    #[inline]
    pub(crate) fn try_notify_all(&self) -> bool {
        self.signal.try_notify_all()
    }
}
