/*!
 * Adaptive Backoff
 *
 * Used by every retry loop in the lock family: the polling lock's waits,
 * the notify retry loops, and the spin phase of adaptive waiters.
 *
 * # Phases
 *
 * 1. **Tight spin** (`step < max_spins`): `spin_loop()` hints, doubling per
 *    step up to 2^SPIN_SHIFT_CAP hints
 * 2. **Yield** (`step < max_spins + max_yields`): `yield_now()`
 * 3. **Exhausted**: keeps yielding, but `is_completed()` reports true so
 *    adaptive waiters switch to blocking
 */

use super::config::SyncConfig;
use crate::core::limits::SPIN_SHIFT_CAP;
use std::hint;
use std::thread;

/// Exponential spin-then-yield backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    step: u32,
    max_spins: u32,
    max_yields: u32,
}

impl Backoff {
    /// Create a backoff with explicit phase lengths
    #[inline]
    pub const fn new(max_spins: u32, max_yields: u32) -> Self {
        Self {
            step: 0,
            max_spins,
            max_yields,
        }
    }

    /// Create a backoff using the limits of a configuration
    #[inline]
    pub const fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_spins, config.max_yields)
    }

    /// Back off for one step
    #[inline]
    pub fn snooze(&mut self) {
        if self.step < self.max_spins {
            for _ in 0..1u32 << self.step.min(SPIN_SHIFT_CAP) {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.step = self.step.saturating_add(1);
    }

    /// True once both the spin and the yield phase are used up
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step >= self.max_spins.saturating_add(self.max_yields)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
