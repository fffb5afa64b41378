//! Coarse progress reporting.
//!
//! Stages report monotonically increasing 0-100 progress through a shared
//! callback.

use std::sync::Arc;

/// A progress callback receiving values in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;
