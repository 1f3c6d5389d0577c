/*!
 * Lock Limits and Constants
 *
 * Centralized location for the tuning knobs and layout constants used by
 * the shared mutex family.
 *
 * ## Conventions
 * - Values are grouped by domain (layout, backoff, registry)
 * - Performance-critical constants are marked with [PERF]
 */

use std::time::Duration;

// =============================================================================
// LAYOUT
// =============================================================================

/// Assumed size of a cache line in bytes
/// [PERF] Hot atomics are aligned to this to avoid false sharing
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of sharing flags packed into one thread-local flag block
/// One `AtomicBool` per byte, so a block fills exactly one cache line
pub const FLAGS_PER_BLOCK: usize = CACHE_LINE_SIZE;

/// Largest shared-holder count the control word can represent
/// The low three bits of the word hold flags
pub const MAX_SHARED_HOLDERS: u32 = u32::MAX >> 3;

// =============================================================================
// BACKOFF
// =============================================================================

/// Tight-spin steps before the backoff starts yielding (default config)
/// [PERF] Each step doubles the number of `spin_loop` hints, capped below
pub const DEFAULT_MAX_SPINS: u32 = 10;

/// Yield steps after the spin phase before an adaptive waiter blocks
pub const DEFAULT_MAX_YIELDS: u32 = 40;

/// Cap on the exponent of the per-step spin count (2^6 = 64 hints)
pub const SPIN_SHIFT_CAP: u32 = 6;

/// Spin steps for the low-latency preset
pub const LOW_LATENCY_MAX_SPINS: u32 = 64;

/// Yield steps for the low-latency preset
pub const LOW_LATENCY_MAX_YIELDS: u32 = 500;

/// Spin steps for the long-wait preset
pub const LONG_WAIT_MAX_SPINS: u32 = 1;

/// Yield steps for the long-wait preset
pub const LONG_WAIT_MAX_YIELDS: u32 = 4;

// =============================================================================
// TIMED ACQUISITION
// =============================================================================

/// Upper bound on a single sleep between timed acquisition attempts
/// Keeps deadline overshoot small once the backoff is exhausted
pub const MAX_TIMED_RETRY_SLEEP: Duration = Duration::from_micros(500);
