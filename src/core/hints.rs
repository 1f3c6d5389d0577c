/*!
 * Compiler Optimization Hints
 * Branch prediction hints for the lock fast paths
 */

/// Hint to the compiler that this branch is likely to be taken
///
/// # Implementation
/// On nightly with core_intrinsics, uses LLVM's `llvm.expect` intrinsic.
/// On stable, routes the unexpected outcome through a `#[cold]` call so the
/// optimizer lays out the expected branch as the fall-through.
#[inline(always)]
#[must_use]
pub fn likely(b: bool) -> bool {
    #[cfg(feature = "nightly")]
    {
        std::intrinsics::likely(b)
    }
    #[cfg(not(feature = "nightly"))]
    {
        if !b {
            cold_path();
        }
        b
    }
}

/// Hint to the compiler that this branch is unlikely to be taken
///
/// Use for contended paths: waiter bits set, writer wanting the lock.
#[inline(always)]
#[must_use]
pub fn unlikely(b: bool) -> bool {
    #[cfg(feature = "nightly")]
    {
        std::intrinsics::unlikely(b)
    }
    #[cfg(not(feature = "nightly"))]
    {
        if b {
            cold_path();
        }
        b
    }
}

#[cfg(not(feature = "nightly"))]
#[cold]
#[inline(never)]
fn cold_path() {}
