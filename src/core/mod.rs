/*!
 * Core Module
 * Lock primitives, limits and error handling
 */

pub mod errors;
pub mod hints;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use hints::*;
