//! Crate-level error types.
//!
//! Packaging operations carry their own error enum in [`crate::packaging::error`];
//! this module wraps it together with CLI-surface failures.

use thiserror::Error;

/// Result type alias for top-level operations
pub type Result<T> = std::result::Result<T, RelpackError>;

/// Main error type for the relpack binary surface
#[derive(Error, Debug)]
pub enum RelpackError {
    /// Packaging engine errors
    #[error("{0}")]
    Packaging(#[from] crate::packaging::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl RelpackError {
    /// True when the error carries a remediation message for the user rather
    /// than indicating an infrastructure failure.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            RelpackError::Packaging(crate::packaging::Error::UserInfo(_))
        )
    }
}
