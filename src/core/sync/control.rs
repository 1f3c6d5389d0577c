/*!
 * Lock Control Word
 *
 * One `u32` multiplexes every piece of lock state that must change
 * atomically together:
 *
 * ```text
 *  31                              3   2   1   0
 * +----------------------------------+---+---+---+
 * |          shared count            | S | L | W |
 * +----------------------------------+---+---+---+
 *   W: a unique locker is waiting
 *   L: the unique lock is held
 *   S: shared lockers are waiting (blocking variant only)
 * ```
 *
 * The shared count is nonzero only while L is clear, and L is set only
 * while the shared count is zero. Every transition goes through a
 * compare-and-swap on the whole word, so no combination of fields is ever
 * observed half-updated.
 */

use crate::core::limits::MAX_SHARED_HOLDERS;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

const UNIQUE_WAIT: u32 = 1;
const UNIQUE_LOCK: u32 = 1 << 1;
const SHARED_WAIT: u32 = 1 << 2;
const SHARED_ONE: u32 = 1 << 3;

const WAIT_MASK: u32 = UNIQUE_WAIT | SHARED_WAIT;
const HOLDER_MASK: u32 = !(UNIQUE_WAIT | SHARED_WAIT);

/// Snapshot of a control word
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct ControlWord(u32);

impl ControlWord {
    /// No holders, no waiters
    pub(crate) const IDLE: Self = Self(0);

    #[inline(always)]
    pub(crate) const fn bits(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub(crate) const fn is_unique_locked(self) -> bool {
        self.0 & UNIQUE_LOCK != 0
    }

    #[inline(always)]
    pub(crate) const fn is_unique_wanted(self) -> bool {
        self.0 & UNIQUE_WAIT != 0
    }

    #[inline(always)]
    pub(crate) const fn is_shared_waiting(self) -> bool {
        self.0 & SHARED_WAIT != 0
    }

    #[inline(always)]
    pub(crate) const fn shared_count(self) -> u32 {
        self.0 / SHARED_ONE
    }

    /// Someone holds the lock, uniquely or shared
    #[inline(always)]
    pub(crate) const fn is_held(self) -> bool {
        self.0 & HOLDER_MASK != 0
    }

    /// Either wait bit is set
    #[inline(always)]
    pub(crate) const fn has_waiters(self) -> bool {
        self.0 & WAIT_MASK != 0
    }

    /// Waiters are registered but nobody holds the lock, so no future
    /// release will wake them
    #[inline(always)]
    pub(crate) const fn is_stranded(self) -> bool {
        self.has_waiters() && !self.is_held()
    }

    /// Some waiter could proceed right now, yet no holder is bound to wake
    /// it: a stranded waiter, or parked readers while no writer is around
    #[inline(always)]
    pub(crate) const fn has_admissible_waiters(self) -> bool {
        self.is_stranded() || (self.is_shared_waiting() && !self.blocks_shared())
    }

    /// New shared lockers must stay out: a writer holds or wants the lock
    #[inline(always)]
    pub(crate) const fn blocks_shared(self) -> bool {
        self.0 & (UNIQUE_LOCK | UNIQUE_WAIT) != 0
    }

    #[inline(always)]
    pub(crate) const fn with_unique_lock(self) -> Self {
        Self(self.0 | UNIQUE_LOCK)
    }

    #[inline(always)]
    pub(crate) const fn without_unique_lock(self) -> Self {
        Self(self.0 & !UNIQUE_LOCK)
    }

    #[inline(always)]
    pub(crate) const fn with_unique_wait(self) -> Self {
        Self(self.0 | UNIQUE_WAIT)
    }

    #[inline(always)]
    pub(crate) const fn without_unique_wait(self) -> Self {
        Self(self.0 & !UNIQUE_WAIT)
    }

    #[inline(always)]
    pub(crate) const fn with_shared_wait(self) -> Self {
        Self(self.0 | SHARED_WAIT)
    }

    #[inline(always)]
    pub(crate) const fn without_shared_wait(self) -> Self {
        Self(self.0 & !SHARED_WAIT)
    }

    /// One more shared holder
    #[inline(always)]
    pub(crate) fn with_shared_acquired(self) -> Self {
        debug_assert!(!self.is_unique_locked(), "shared acquire under unique lock");
        debug_assert!(
            self.shared_count() < MAX_SHARED_HOLDERS,
            "shared holder count overflow"
        );
        Self(self.0 + SHARED_ONE)
    }

    /// One less shared holder
    #[inline(always)]
    pub(crate) fn with_shared_released(self) -> Self {
        debug_assert!(self.shared_count() > 0, "unlock_shared without shared lock");
        Self(self.0 - SHARED_ONE)
    }
}

impl fmt::Debug for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlWord")
            .field("bits", &format_args!("{:#b}", self.bits()))
            .field("unique_locked", &self.is_unique_locked())
            .field("unique_wanted", &self.is_unique_wanted())
            .field("shared_waiting", &self.is_shared_waiting())
            .field("shared_count", &self.shared_count())
            .finish()
    }
}

/// Atomic cell holding a control word
///
/// Cache-line aligned: it is the only hot shared state of the blocking and
/// polling variants.
#[repr(C, align(64))]
pub(crate) struct AtomicControl {
    word: AtomicU32,
}

impl AtomicControl {
    pub(crate) const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn load(&self, order: Ordering) -> ControlWord {
        ControlWord(self.word.load(order))
    }

    #[inline(always)]
    pub(crate) fn compare_exchange(
        &self,
        current: ControlWord,
        new: ControlWord,
        success: Ordering,
    ) -> Result<ControlWord, ControlWord> {
        self.word
            .compare_exchange(current.0, new.0, success, Ordering::Relaxed)
            .map(ControlWord)
            .map_err(ControlWord)
    }

    #[inline(always)]
    pub(crate) fn compare_exchange_weak(
        &self,
        current: ControlWord,
        new: ControlWord,
        success: Ordering,
    ) -> Result<ControlWord, ControlWord> {
        self.word
            .compare_exchange_weak(current.0, new.0, success, Ordering::Relaxed)
            .map(ControlWord)
            .map_err(ControlWord)
    }

    /// CAS loop applying `f` until it succeeds or `f` declines
    ///
    /// Returns `Ok((previous, installed))` or `Err(last_seen)` when `f`
    /// returned `None`.
    #[inline(always)]
    pub(crate) fn transition<F>(
        &self,
        success: Ordering,
        mut f: F,
    ) -> Result<(ControlWord, ControlWord), ControlWord>
    where
        F: FnMut(ControlWord) -> Option<ControlWord>,
    {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            let next = f(current).ok_or(current)?;
            match self.compare_exchange_weak(current, next, success) {
                Ok(_) => return Ok((current, next)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Add a shared holder unless a writer holds or wants the lock
    #[inline]
    pub(crate) fn try_acquire_shared(&self) -> bool {
        self.transition(Ordering::Acquire, |word| {
            (!word.blocks_shared()).then(|| word.with_shared_acquired())
        })
        .is_ok()
    }

    /// Drop a shared holder, returning the word as left behind
    #[inline]
    pub(crate) fn release_shared(&self) -> ControlWord {
        match self.transition(Ordering::Release, |word| Some(word.with_shared_released())) {
            Ok((_, next)) => next,
            Err(word) => word,
        }
    }

    /// Clear the unique-lock bit, returning the word as left behind
    #[inline]
    pub(crate) fn release_unique(&self) -> ControlWord {
        let released = self.transition(Ordering::Release, |word| {
            debug_assert!(word.is_unique_locked(), "unlock without unique lock");
            Some(word.without_unique_lock())
        });
        match released {
            Ok((_, next)) => next,
            Err(word) => word,
        }
    }
}

impl fmt::Debug for AtomicControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}
