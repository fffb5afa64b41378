//! File system helpers with bounded retry.
//!
//! Two retry disciplines exist:
//! - [`retry_io`] is wide: it retries every failure except a missing input,
//!   to tolerate transient external locks (anti-virus scanners,
//!   explorer-style file holders) on platforms where those are common.
//! - [`retry_handle`] is narrow: it gives up immediately on a fixed set of
//!   known-permanent error kinds, so OS-handle-level retries never mask a
//!   real error.
//!
//! Both use fixed-delay backoff bounded to a constant attempt count.

use std::io;
use std::path::Path;
use std::time::Duration;

use super::super::error::{ErrorExt, Result};

/// Maximum attempts for retried file operations.
pub const RETRY_ATTEMPTS: u32 = 500;

/// Fixed delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry an io operation with fixed delay until it succeeds or the attempt
/// budget is exhausted. A missing input is surfaced immediately - waiting
/// never makes an absent file appear.
pub fn retry_io<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    retry_io_with(RETRY_ATTEMPTS, &mut f)
}

/// [`retry_io`] with an explicit attempt budget.
pub fn retry_io_with<T>(attempts: u32, f: &mut dyn FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut last = None;
    for i in 1..=attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => {
                if i < attempts {
                    std::thread::sleep(RETRY_DELAY);
                }
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| io::Error::other("retry budget exhausted")))
}

/// Retry an io operation, but give up immediately on error kinds that no
/// amount of waiting can fix (invalid path, bad format, out of memory...).
pub fn retry_handle<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut last = None;
    for i in 1..=RETRY_ATTEMPTS {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_permanent(e.kind()) => return Err(e),
            Err(e) => {
                if i < RETRY_ATTEMPTS {
                    std::thread::sleep(RETRY_DELAY);
                }
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| io::Error::other("retry budget exhausted")))
}

/// Error kinds that a handle-level retry must never paper over.
fn is_permanent(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::OutOfMemory
            | io::ErrorKind::Unsupported
    )
}

/// Move a file into place, falling back to copy+delete across devices.
///
/// If the fallback also fails, the original rename failure is surfaced, not
/// the secondary one.
pub fn move_file(from: &Path, to: &Path, overwrite: bool) -> Result<()> {
    if overwrite && to.exists() {
        retry_io(|| std::fs::remove_file(to)).fs_context("removing existing file", to)?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).fs_context("creating destination directory", parent)?;
    }
    match retry_io(|| std::fs::rename(from, to)) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            let copied = retry_io(|| std::fs::copy(from, to)).and_then(|_| {
                std::fs::remove_file(from)
            });
            match copied {
                Ok(()) => Ok(()),
                // Keep the root cause, not the fallback failure.
                Err(_) => Err(rename_err).fs_context("moving file into place", to),
            }
        }
    }
}

/// Recursively copy a directory tree, preserving symlinks.
pub fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            super::super::error::Error::GenericError(format!("walking {from:?}: {e}"))
        })?;
        let rel = entry.path().strip_prefix(from).map_err(|e| {
            super::super::error::Error::GenericError(format!("path escape: {e}"))
        })?;
        let dest = to.join(rel);
        if entry.file_type().is_symlink() {
            let target =
                std::fs::read_link(entry.path()).fs_context("reading symlink", entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dest).fs_context("creating symlink", &dest)?;
            #[cfg(windows)]
            std::os::windows::fs::symlink_file(&target, &dest)
                .fs_context("creating symlink", &dest)?;
        } else if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).fs_context("creating directory", &dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).fs_context("creating directory", parent)?;
            }
            std::fs::copy(entry.path(), &dest).fs_context("copying file", entry.path())?;
        }
    }
    Ok(())
}

/// Locate a helper file (eg. a bootstrapper template) in an explicit list of
/// search paths. The list is configuration threaded through the builder, not
/// ambient global state.
pub fn find_helper_file(name: &str, search_paths: &[std::path::PathBuf]) -> Option<std::path::PathBuf> {
    search_paths
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn retry_io_fails_fast_on_missing_input() {
        let attempts = AtomicU32::new(0);
        let result: io::Result<()> = retry_io(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_io_retries_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_io(|| {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io::Error::other("locked"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_handle_does_not_retry_permanent_kinds() {
        for kind in [
            io::ErrorKind::NotFound,
            io::ErrorKind::InvalidInput,
            io::ErrorKind::InvalidData,
            io::ErrorKind::OutOfMemory,
            io::ErrorKind::Unsupported,
        ] {
            let attempts = AtomicU32::new(0);
            let result: io::Result<()> = retry_handle(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(kind, "permanent"))
            });
            assert!(result.is_err());
            assert_eq!(attempts.load(Ordering::SeqCst), 1, "kind {kind:?}");
        }
    }

    #[test]
    fn move_file_overwrites_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("a");
        let to = tmp.path().join("b");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"old").unwrap();
        move_file(&from, &to, true).unwrap();
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
        assert!(!from.exists());
    }

    #[test]
    fn find_helper_file_searches_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(b.join("tool"), b"x").unwrap();
        let found = find_helper_file("tool", &[a.clone(), b.clone()]).unwrap();
        assert_eq!(found, b.join("tool"));
        assert!(find_helper_file("missing", &[a, b]).is_none());
    }
}
