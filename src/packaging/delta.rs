//! Binary delta generation and application.
//!
//! Wraps the external `zstd` tool to produce a patch between two full
//! release containers such that `apply(old, patch) == new` byte-for-byte.
//! Diffing is pinned to a single thread so the produced bytes are
//! reproducible across machines - a correctness requirement, since the
//! patch file is itself a published, checksummed asset.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::bail;

use super::container::ReleasePackage;
use super::error::{Error, ErrorExt, Result};
use super::utils::fs::find_helper_file;
use super::utils::process;

/// Delta generation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DeltaMode {
    /// Delta generation disabled; the delta stage is skipped entirely
    None,
    /// Default compression parameters, fastest generation
    #[default]
    BestSpeed,
    /// Maximum compression level with a longer match chain and smaller
    /// target match length; substantially more compute for smaller patches
    BestSize,
}

/// Window logs above this threshold enable long-distance matching.
const LONG_MODE_MIN_WINDOW_LOG: u32 = 27;

/// Window logs above this are rejected; the patch would exceed what the
/// decoder side can be expected to reconstruct.
const MAX_WINDOW_LOG: u32 = 30;

/// Driver for the external binary-diff tool.
pub struct DeltaEngine {
    zstd_path: PathBuf,
}

impl DeltaEngine {
    /// Locate `zstd`, preferring the explicit helper search paths over the
    /// system `PATH`.
    pub fn new(search_paths: &[PathBuf]) -> Result<DeltaEngine> {
        let name = if cfg!(windows) { "zstd.exe" } else { "zstd" };
        let zstd_path = find_helper_file(name, search_paths)
            .or_else(|| which::which(name).ok())
            .ok_or_else(|| {
                Error::user_info(
                    "Could not find 'zstd' on the system. Install it and ensure it is on the \
                     PATH, or pass its directory as a helper search path.",
                )
            })?;
        Ok(DeltaEngine { zstd_path })
    }

    /// The resolved path of the diff tool.
    pub fn zstd_path(&self) -> &Path {
        &self.zstd_path
    }

    /// `windowLog = floor(log2(size)) + 1`, the window needed to reference
    /// any byte of the base file.
    pub fn window_log(size: u64) -> u32 {
        64 - size.max(1).leading_zeros()
    }

    fn window_args(base_size: u64) -> Result<Vec<String>> {
        let wlog = Self::window_log(base_size);
        if wlog > MAX_WINDOW_LOG {
            return Err(Error::user_info(format!(
                "The base file is too large ({base_size} bytes) to generate a delta from. \
                 Disable delta generation for this release (--delta none)."
            )));
        }
        if wlog >= LONG_MODE_MIN_WINDOW_LOG {
            Ok(vec![format!("--long={wlog}")])
        } else {
            Ok(Vec::new())
        }
    }

    /// Produce a binary patch transforming `old` into `new`.
    ///
    /// A non-zero exit of the diff tool is fatal and surfaces its captured
    /// output.
    pub async fn create_patch(
        &self,
        old: &ReleasePackage,
        new: &ReleasePackage,
        output: &Path,
        mode: DeltaMode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if mode == DeltaMode::None {
            return Err(Error::GenericError(
                "create_patch called with DeltaMode::None; the caller must skip the delta stage"
                    .into(),
            ));
        }
        if output.exists() {
            bail!("delta output already exists: {output:?}");
        }
        let old_version = old.version()?;
        let new_version = new.version()?;
        if old_version >= new_version {
            return Err(Error::user_info(format!(
                "Cannot create a delta from version {old_version} to {new_version}; the base \
                 must be strictly older than the new release."
            )));
        }

        let base_size = std::fs::metadata(old.path())
            .fs_context("reading base package metadata", old.path())?
            .len();

        let mut args: Vec<String> = vec![
            "--patch-from".into(),
            old.path().display().to_string(),
            "-o".into(),
            output.display().to_string(),
            "--force".into(),
            "--single-thread".into(),
        ];
        args.extend(Self::window_args(base_size)?);
        if mode == DeltaMode::BestSize {
            args.extend([
                "-19".into(),
                "--target-length=4096".into(),
                "--chain-log=30".into(),
            ]);
        }
        args.push(new.path().display().to_string());

        log::info!(
            "Creating {mode:?} delta for {old_version} -> {new_version} (windowLog={})",
            Self::window_log(base_size)
        );
        process::invoke(&self.zstd_path, &args, None, cancel).await?;
        Ok(())
    }

    /// Reconstruct the new file from `base` and `patch`. The window log is
    /// recomputed from the base size with the same formula the generator
    /// used.
    pub async fn apply_patch(
        &self,
        base: &Path,
        patch: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let base_size = std::fs::metadata(base)
            .fs_context("reading base package metadata", base)?
            .len();

        let mut args: Vec<String> = vec![
            "-d".into(),
            "--patch-from".into(),
            base.display().to_string(),
            "-o".into(),
            output.display().to_string(),
            "--force".into(),
            "--single-thread".into(),
        ];
        args.extend(Self::window_args(base_size)?);
        args.push(patch.display().to_string());

        process::invoke(&self.zstd_path, &args, None, cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_log_is_floor_log2_plus_one() {
        assert_eq!(DeltaEngine::window_log(1), 1);
        assert_eq!(DeltaEngine::window_log(2), 2);
        assert_eq!(DeltaEngine::window_log(3), 2);
        assert_eq!(DeltaEngine::window_log(4), 3);
        assert_eq!(DeltaEngine::window_log(1 << 20), 21);
        assert_eq!(DeltaEngine::window_log((1 << 20) + 1), 21);
        assert_eq!(DeltaEngine::window_log((1 << 21) - 1), 21);
    }

    #[test]
    fn window_args_enable_long_mode_at_threshold() {
        // Just below 2^26: windowLog 26, no long mode.
        assert!(DeltaEngine::window_args((1 << 26) - 1).unwrap().is_empty());
        // 2^26 exactly: windowLog 27 enables long-distance matching.
        assert_eq!(
            DeltaEngine::window_args(1 << 26).unwrap(),
            vec!["--long=27".to_string()]
        );
        assert_eq!(
            DeltaEngine::window_args(1 << 29).unwrap(),
            vec!["--long=30".to_string()]
        );
    }

    #[test]
    fn oversized_base_is_a_user_actionable_error() {
        // 2^30 bytes: windowLog 31, beyond the supported maximum.
        let err = DeltaEngine::window_args(1 << 30).unwrap_err();
        assert!(matches!(err, Error::UserInfo(_)));
        assert!(err.to_string().contains("too large"));
    }
}
