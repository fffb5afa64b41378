//! Shared utilities for the packaging engine.

pub mod fs;
pub mod process;
pub mod progress;
pub mod zip;
