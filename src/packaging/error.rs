//! Error types for packaging operations.
//!
//! Errors fall into two classes: user-actionable ([`Error::UserInfo`]) which
//! abort immediately with a remediation message and are never retried, and
//! transient/infrastructure errors which callers may retry a bounded number
//! of times before escalating.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for packaging operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all packaging operations
#[derive(Error, Debug)]
pub enum Error {
    /// A condition the user must resolve (conflicting version, missing tool,
    /// unsupported input). Never retried.
    #[error("{0}")]
    UserInfo(String),

    /// An external tool exited non-zero. Carries the captured process output.
    #[error("process failed: {command}\n{output}")]
    ProcessFailed {
        /// The command line that was invoked
        command: String,
        /// Combined stdout/stderr captured from the process
        output: String,
    },

    /// The bundle signature was not found in the searched binary.
    #[error("placeholder signature not found in {0:?} - the file is not a valid bootstrapper template")]
    PlaceholderNotFound(PathBuf),

    /// Post-write verification of a setup bundle did not reproduce the
    /// written header. Indicates a build-toolchain mismatch, not transient.
    #[error("internal logic error writing setup bundle: {0}")]
    BundleVerification(String),

    /// The build was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO errors annotated with the operation and path that failed
    #[error("IO error while {action} at {path:?}: {source}")]
    IoContext {
        /// What was being attempted
        action: String,
        /// The path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip archive errors
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Semantic version parse errors
    #[error("version error: {0}")]
    Semver(#[from] semver::Error),

    /// Catch-all for everything else
    #[error("{0}")]
    GenericError(String),
}

impl Error {
    /// Construct a user-actionable error with a remediation message.
    pub fn user_info(msg: impl Into<String>) -> Self {
        Error::UserInfo(msg.into())
    }
}

/// Constructs a [`Error::GenericError`] from a format string and returns it.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::packaging::Error::GenericError(format!($($arg)*)))
    };
}

/// Extension trait for attaching file-system context to io results.
pub trait ErrorExt<T> {
    /// Annotate an io error with the action attempted and the path involved.
    fn fs_context(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> ErrorExt<T> for std::io::Result<T> {
    fn fs_context(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::IoContext {
            action: action.to_string(),
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Extension trait for replacing an arbitrary error with a message.
pub trait Context<T> {
    /// Replace the error with a [`Error::GenericError`] carrying `msg` and
    /// the original error text.
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::GenericError(format!("{msg}: {e}")))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| Error::GenericError(msg.to_string()))
    }
}
