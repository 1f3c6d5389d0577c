/*!
 * Synchronization Configuration
 *
 * Selects how the slow paths of the shared mutexes wait: spin, block on a
 * condition variable, or spin first and block once the backoff runs out.
 */

use crate::core::limits::{
    DEFAULT_MAX_SPINS, DEFAULT_MAX_YIELDS, LONG_WAIT_MAX_SPINS, LONG_WAIT_MAX_YIELDS,
    LOW_LATENCY_MAX_SPINS, LOW_LATENCY_MAX_YIELDS,
};
use std::sync::OnceLock;
use std::thread;
use tracing::debug;

/// Strategy type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyType {
    /// Never block; release the wait mutex and back off between checks
    Spin,
    /// Block on the condition variable immediately
    Block,
    /// Spin while the backoff lasts, then block
    Adaptive,
    /// Auto-select based on the host (single CPU blocks, otherwise adaptive)
    Auto,
}

/// Synchronization configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Preferred strategy
    pub strategy: StrategyType,
    /// Tight-spin steps before yielding
    pub max_spins: u32,
    /// Yield steps after the spin phase before the backoff counts as exhausted
    pub max_yields: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfig {
    /// Default configuration, usable in `const` contexts
    pub const fn new() -> Self {
        Self {
            strategy: StrategyType::Auto,
            max_spins: DEFAULT_MAX_SPINS,
            max_yields: DEFAULT_MAX_YIELDS,
        }
    }

    /// Configuration optimized for low latency (short critical sections)
    pub const fn low_latency() -> Self {
        Self {
            strategy: StrategyType::Spin,
            max_spins: LOW_LATENCY_MAX_SPINS,
            max_yields: LOW_LATENCY_MAX_YIELDS,
        }
    }

    /// Configuration optimized for long waits (long critical sections)
    pub const fn long_wait() -> Self {
        Self {
            strategy: StrategyType::Block,
            max_spins: LONG_WAIT_MAX_SPINS,
            max_yields: LONG_WAIT_MAX_YIELDS,
        }
    }

    /// Same limits with a different strategy
    pub const fn with_strategy(mut self, strategy: StrategyType) -> Self {
        self.strategy = strategy;
        self
    }

    /// Resolve `Auto` to a concrete strategy for this host
    pub fn select_strategy(&self) -> StrategyType {
        match self.strategy {
            StrategyType::Auto => auto_strategy(),
            other => other,
        }
    }
}

/// Spinning only pays off when another CPU can release the lock meanwhile
fn auto_strategy() -> StrategyType {
    static RESOLVED: OnceLock<StrategyType> = OnceLock::new();

    *RESOLVED.get_or_init(|| {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        let strategy = if cpus > 1 {
            StrategyType::Adaptive
        } else {
            StrategyType::Block
        };
        debug!(cpus, ?strategy, "resolved automatic wait strategy");
        strategy
    })
}
