/*!
 * Shared Locks Library
 * Shared/exclusive mutexes: blocking, polling and rarely-unique variants
 */

#![cfg_attr(feature = "nightly", feature(core_intrinsics))]
#![cfg_attr(feature = "nightly", allow(internal_features))]

pub mod core;

// Re-exports
pub use crate::core::errors::{LockError, LockResult};
pub use crate::core::sync::*;
