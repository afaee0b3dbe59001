//! Request handlers for sync operations.

mod sync;

pub use sync::*;
