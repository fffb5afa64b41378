//! Release packaging and delta-update engine for self-updating desktop apps.
//!
//! This library builds and maintains versioned release artifacts:
//! - Full release containers (a zip archive with an embedded manifest)
//! - Portable application archives
//! - Self-contained setup executables (bootstrapper + embedded container)
//! - Binary delta patches between consecutive full releases
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod error;
pub mod packaging;

// Re-export commonly used types
pub use error::{RelpackError, Result};
