//! Release build pipeline.
//!
//! [`PackageBuilder`] drives a fixed stage sequence over a [`PlatformStages`]
//! implementation selected by target OS:
//!
//! `Validate -> Preprocess -> CodeSign (not linux) ->
//! {BuildPortable || BuildFullRelease} -> BuildSetup (not linux) ->
//! BuildDelta (conditional) -> Postprocess`
//!
//! All artifacts are written to a scratch directory and moved into the
//! release directory only during `Postprocess`, which is also the only point
//! where the published index files are rewritten.

mod pipeline;
mod platform;

pub use pipeline::{ConfirmFn, PackageBuilder, StageProgressFn};
pub use platform::{stages_for, LinuxStages, OsxStages, PlatformStages, WindowsStages};

use std::path::PathBuf;

use semver::Version;

use super::asset::TargetOs;
use super::delta::DeltaMode;

/// Inputs of one `pack` run.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Unique package id, also the default base of artifact file names
    pub pack_id: String,
    /// Version of the release being packed
    pub pack_version: Version,
    /// Directory holding the application files to pack
    pub pack_dir: PathBuf,
    /// Output directory holding released artifacts and index files
    pub release_dir: PathBuf,
    /// Release channel; `None` selects the target OS default
    pub channel: Option<String>,
    /// OS the release targets
    pub target_os: TargetOs,
    /// File name of the main executable inside `pack_dir`; `None` derives it
    /// from `pack_id`
    pub main_exe: Option<String>,
    /// Markdown release-notes file to embed in the container manifest
    pub notes: Option<PathBuf>,
    /// Delta generation strategy
    pub delta_mode: DeltaMode,
    /// Retention: number of full releases to keep, `0` keeps everything
    pub keep_max_releases: usize,
    /// Skip the portable archive artifact
    pub no_portable: bool,
    /// Skip the setup executable artifact
    pub no_setup: bool,
    /// Directories searched for helper files (bootstrapper templates, zstd)
    pub search_paths: Vec<PathBuf>,
}

impl PackOptions {
    /// The effective channel: explicit, or the target OS default.
    pub fn channel(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| self.target_os.default_channel().to_string())
    }
}
