//! The pack pipeline orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::super::asset::{
    self, AssetType, ReleaseAsset, ReleaseFeed, TargetOs,
};
use super::super::bundle;
use super::super::container::{create_container, Manifest, ReleasePackage};
use super::super::delta::{DeltaEngine, DeltaMode};
use super::super::entries::{self, ReleaseEntryHelper};
use super::super::error::{Context, Error, ErrorExt, Result};
use super::super::utils::fs::{copy_dir, find_helper_file, move_file};
use super::super::utils::progress::ProgressFn;
use super::super::utils::zip::zip_dir;
use super::{stages_for, PackOptions, PlatformStages};

/// Per-stage progress callback: stage name and 0-100 completion.
pub type StageProgressFn = Arc<dyn Fn(&str, u8) + Send + Sync>;

/// Asked before overwriting an equal-or-newer existing release; returning
/// `false` aborts the run.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Drives one `pack` run end to end.
pub struct PackageBuilder {
    options: PackOptions,
    stages: Box<dyn PlatformStages>,
    confirm: ConfirmFn,
    progress: StageProgressFn,
    cancel: CancellationToken,
}

impl PackageBuilder {
    /// Create a builder for the options' target OS. Overwrite confirmation
    /// defaults to deny; set [`Self::with_confirm`] for interactive or
    /// forced runs.
    pub fn new(options: PackOptions) -> PackageBuilder {
        let stages = stages_for(options.target_os);
        PackageBuilder {
            options,
            stages,
            confirm: Arc::new(|_| false),
            progress: Arc::new(|stage, pct| log::debug!("[{stage}] {pct}%")),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the overwrite-confirmation callback.
    pub fn with_confirm(mut self, confirm: ConfirmFn) -> PackageBuilder {
        self.confirm = confirm;
        self
    }

    /// Replace the stage progress callback.
    pub fn with_progress(mut self, progress: StageProgressFn) -> PackageBuilder {
        self.progress = progress;
        self
    }

    /// Attach a cancellation token; cancellation aborts between stages and
    /// kills any running external tool.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> PackageBuilder {
        self.cancel = cancel;
        self
    }

    /// The options this builder was created with.
    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    fn report(&self, stage: &str, pct: u8) {
        (self.progress)(stage, pct);
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn stage_progress(&self, stage: &'static str) -> ProgressFn {
        let cb = self.progress.clone();
        Arc::new(move |pct| cb(stage, pct))
    }

    /// Run the full pipeline. Returns the channel feed as published.
    pub async fn run(&self) -> Result<ReleaseFeed> {
        let o = &self.options;
        let channel = o.channel();

        // Validate
        self.report("validate", 0);
        let current = TargetOs::current();
        if o.target_os != current {
            return Err(Error::user_info(format!(
                "Packaging for {} is only supported when running on {} (current OS: {current}); \
                 cross-OS packaging is not supported.",
                o.target_os, o.target_os
            )));
        }
        validate_pack_id(&o.pack_id)?;
        if !o.pack_dir.is_dir() {
            return Err(Error::user_info(format!(
                "Pack directory does not exist: {:?}",
                o.pack_dir
            )));
        }
        let candidates = self
            .stages
            .main_exe_candidates(&o.pack_id, o.main_exe.as_deref());
        let main_exe = candidates
            .iter()
            .find(|c| o.pack_dir.join(c).is_file())
            .cloned()
            .ok_or_else(|| {
                Error::user_info(format!(
                    "Could not find the main executable in {:?} (searched for: {}). \
                     Pass --main-exe to name it explicitly.",
                    o.pack_dir,
                    candidates.join(", ")
                ))
            })?;
        std::fs::create_dir_all(&o.release_dir)
            .fs_context("creating release directory", &o.release_dir)?;

        let helper = ReleaseEntryHelper::new(&o.release_dir, channel.as_str())?;
        if helper.does_similar_version_exist(&o.pack_version) {
            let question = format!(
                "A release equal to or newer than {} already exists in channel '{channel}'. \
                 Overwrite it?",
                o.pack_version
            );
            if !(self.confirm)(&question) {
                return Err(Error::user_info(format!(
                    "A release equal to or newer than {} already exists in channel \
                     '{channel}'. Pick a higher version, or confirm the overwrite.",
                    o.pack_version
                )));
            }
        }
        let prev_full = helper.get_previous_full_package(&o.pack_version);
        self.report("validate", 100);
        self.checkpoint()?;

        // Everything is built in a scratch directory inside the release dir
        // (so Postprocess moves are same-filesystem renames) and only moved
        // into place at the end.
        let scratch = tempfile::Builder::new()
            .prefix(".relpack-")
            .tempdir_in(&o.release_dir)
            .fs_context("creating scratch directory", &o.release_dir)?;

        // Preprocess
        let staged = scratch.path().join("staging");
        copy_dir(&o.pack_dir, &staged)?;
        self.stages.preprocess(&staged, &main_exe)?;
        self.report("preprocess", 100);
        self.checkpoint()?;

        // CodeSign
        if o.target_os != TargetOs::Linux {
            self.stages.code_sign(&staged)?;
            self.report("codesign", 100);
            self.checkpoint()?;
        }

        let notes_markdown = match &o.notes {
            Some(path) => Some(
                std::fs::read_to_string(path).fs_context("reading release notes", path)?,
            ),
            None => None,
        };
        let manifest = Manifest {
            id: o.pack_id.clone(),
            version: o.pack_version.clone(),
            channel: channel.clone(),
            main_exe: main_exe.clone(),
            notes_markdown,
            notes_html: None,
        };

        // BuildFullRelease and BuildPortable share no state and run
        // concurrently.
        let full_name =
            asset::suggested_release_name(&o.pack_id, &o.pack_version, &channel, false, o.target_os);
        let full_tmp = scratch.path().join(&full_name);
        let full_task = {
            let manifest = manifest.clone();
            let staged = staged.clone();
            let out = full_tmp.clone();
            let progress = self.stage_progress("release");
            tokio::task::spawn_blocking(move || create_container(&manifest, &staged, &out, &progress))
        };

        let portable_name = asset::suggested_portable_name(&o.pack_id, &channel);
        let portable_tmp = scratch.path().join(&portable_name);
        let portable_task = if o.no_portable {
            None
        } else {
            let staged = staged.clone();
            let out = portable_tmp.clone();
            let progress = self.stage_progress("portable");
            Some(tokio::task::spawn_blocking(move || {
                zip_dir(&staged, &out, &progress)
            }))
        };

        let portable_built = join_build_tasks(full_task, portable_task).await?;
        log::info!("Built full release {full_name}");
        if portable_built {
            log::info!("Built portable archive {portable_name}");
        }
        self.checkpoint()?;

        // BuildSetup
        let setup_name = if o.no_setup {
            None
        } else {
            asset::suggested_setup_name(&o.pack_id, &channel, o.target_os)
        };
        let setup_tmp = match (&setup_name, self.stages.setup_template()) {
            (Some(name), Some(template_name)) => {
                let template =
                    find_helper_file(template_name, &o.search_paths).ok_or_else(|| {
                        Error::user_info(format!(
                            "Bootstrapper template '{template_name}' not found in the helper \
                             search paths. Pass its directory with --search-path, or use \
                             --no-setup to skip the setup artifact."
                        ))
                    })?;
                let out = scratch.path().join(name);
                let offset = bundle::create_bundle(&template, &full_tmp, &out)?;
                log::info!("Built setup bundle {name} (payload at {offset})");
                self.report("setup", 100);
                Some(out)
            }
            _ => None,
        };
        self.checkpoint()?;

        // BuildDelta
        let delta_tmp = self
            .build_delta(prev_full.as_ref(), &full_tmp, &channel, scratch.path())
            .await?;
        self.checkpoint()?;

        // Postprocess: move artifacts into place, then rewrite the index.
        self.report("postprocess", 0);
        let mut local = ReleaseFeed::default();

        move_file(&full_tmp, &o.release_dir.join(&full_name), true)?;
        local
            .assets
            .push(ReleaseAsset::from_container(&o.release_dir.join(&full_name))?);

        if let Some(delta_path) = &delta_tmp {
            let name = file_name_of(delta_path);
            move_file(delta_path, &o.release_dir.join(&name), true)?;
            // A delta is raw patch bytes, not a container; its identity is
            // the release being packed.
            local.assets.push(ReleaseAsset::from_file(
                &o.release_dir.join(&name),
                &o.pack_id,
                &o.pack_version,
                AssetType::Delta,
            )?);
        }

        if portable_built {
            move_file(&portable_tmp, &o.release_dir.join(&portable_name), true)?;
            local.assets.push(ReleaseAsset::from_file(
                &o.release_dir.join(&portable_name),
                &o.pack_id,
                &o.pack_version,
                AssetType::Portable,
            )?);
        }

        if let Some(setup_path) = &setup_tmp {
            let name = file_name_of(setup_path);
            move_file(setup_path, &o.release_dir.join(&name), true)?;
            local.assets.push(ReleaseAsset::from_file(
                &o.release_dir.join(&name),
                &o.pack_id,
                &o.pack_version,
                AssetType::Installer,
            )?);
        }

        let feed = entries::update_release_files(
            &o.release_dir,
            &channel,
            &local,
            o.keep_max_releases,
        )?;
        self.report("postprocess", 100);
        log::info!(
            "Published {} asset(s) to {:?} (channel '{channel}')",
            local.assets.len(),
            o.release_dir
        );
        Ok(feed)
    }

    /// Build the delta patch against the previous full release, if any.
    /// Returns the scratch path of the produced patch.
    async fn build_delta(
        &self,
        prev_full: Option<&ReleasePackage>,
        full_tmp: &Path,
        channel: &str,
        scratch: &Path,
    ) -> Result<Option<PathBuf>> {
        let o = &self.options;
        if o.delta_mode == DeltaMode::None {
            log::debug!("delta generation disabled");
            return Ok(None);
        }
        let Some(prev) = prev_full else {
            log::info!("No previous full release in channel '{channel}', skipping delta.");
            return Ok(None);
        };
        if !prev.path().is_file() {
            log::warn!(
                "Previous full release {:?} is listed in the feed but missing on disk, \
                 skipping delta.",
                prev.path()
            );
            return Ok(None);
        }

        let engine = DeltaEngine::new(&o.search_paths)?;
        let delta_name =
            asset::suggested_release_name(&o.pack_id, &o.pack_version, channel, true, o.target_os);
        let out = scratch.join(&delta_name);
        self.report("delta", 0);
        engine
            .create_patch(
                prev,
                &ReleasePackage::new(full_tmp),
                &out,
                o.delta_mode,
                &self.cancel,
            )
            .await?;
        self.report("delta", 100);
        log::info!("Built delta release {delta_name}");
        Ok(Some(out))
    }
}

/// Await the concurrent full/portable build tasks. Both handles are joined
/// before either result is propagated, so a failed task never leaves its
/// sibling writing into a scratch directory that is being torn down.
/// Returns whether a portable archive was built.
async fn join_build_tasks(
    full: tokio::task::JoinHandle<Result<()>>,
    portable: Option<tokio::task::JoinHandle<Result<()>>>,
) -> Result<bool> {
    let full_res = full.await;
    let portable_res = match portable {
        Some(task) => Some(task.await),
        None => None,
    };
    full_res.context("full release task panicked")??;
    match portable_res {
        Some(res) => {
            res.context("portable task panicked")??;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Package ids become file-name prefixes; restrict them accordingly.
fn validate_pack_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::user_info("Package id must not be empty."));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::user_info(format!(
            "Invalid package id '{id}': only letters, digits, '.', '_' and '-' are allowed."
        )));
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
