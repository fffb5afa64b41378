//! Selection, merge and retention logic over release feeds.
//!
//! All selection operations are scoped to a single channel. The on-disk
//! index files (JSON feed plus the legacy text feed) are rewritten only by
//! [`update_release_files`], which is the single mutation point of the
//! published index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;

use super::asset::{
    suggested_release_name, AssetType, ReleaseAsset, ReleaseFeed, TargetOs, CONTAINER_EXT,
};
use super::container::ReleasePackage;
use super::error::{ErrorExt, Result};

/// Per-channel view over the release assets of a release directory.
pub struct ReleaseEntryHelper {
    release_dir: PathBuf,
    channel: String,
    releases: BTreeMap<String, Vec<ReleaseAsset>>,
}

impl ReleaseEntryHelper {
    /// Scan a release directory for containers and build a channel view.
    pub fn new(release_dir: &Path, channel: impl Into<String>) -> Result<ReleaseEntryHelper> {
        let releases = releases_from_dir(release_dir)?;
        Ok(ReleaseEntryHelper {
            release_dir: release_dir.to_path_buf(),
            channel: channel.into(),
            releases,
        })
    }

    /// Build a channel view over an in-memory asset list (used when the feed
    /// was obtained from a remote index rather than a directory scan).
    pub fn with_assets(
        release_dir: &Path,
        channel: impl Into<String>,
        assets: Vec<ReleaseAsset>,
    ) -> ReleaseEntryHelper {
        let channel = channel.into();
        let mut releases = BTreeMap::new();
        releases.insert(channel.clone(), assets);
        ReleaseEntryHelper {
            release_dir: release_dir.to_path_buf(),
            channel,
            releases,
        }
    }

    /// The channel this helper selects from.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn channel_assets(&self) -> &[ReleaseAsset] {
        self.releases
            .get(&self.channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True iff any existing asset (full or delta) has a version greater
    /// than or equal to the candidate. Used as a safety gate before
    /// overwriting a release directory; the caller must confirm before
    /// proceeding when this returns true.
    pub fn does_similar_version_exist(&self, candidate: &Version) -> bool {
        self.channel_assets()
            .iter()
            .any(|a| a.version >= *candidate)
    }

    /// The greatest-versioned full release strictly below the candidate, or
    /// `None`. This is the mandatory base for delta generation; without it
    /// the delta stage is skipped.
    pub fn get_previous_full_release(&self, candidate: &Version) -> Option<&ReleaseAsset> {
        self.channel_assets()
            .iter()
            .filter(|a| a.kind == AssetType::Full)
            .filter(|a| a.version < *candidate)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// Resolve [`Self::get_previous_full_release`] to the container file in
    /// the release directory.
    pub fn get_previous_full_package(&self, candidate: &Version) -> Option<ReleasePackage> {
        self.get_previous_full_release(candidate)
            .map(|a| ReleasePackage::new(self.release_dir.join(&a.file_name)))
    }

    /// The maximum-versioned full release in the channel.
    pub fn get_latest_full_release(&self) -> Option<&ReleaseAsset> {
        self.channel_assets()
            .iter()
            .filter(|a| a.kind == AssetType::Full)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    /// All assets sharing the maximum version in the channel, ordered by
    /// asset type.
    pub fn get_latest_assets(&self) -> Vec<&ReleaseAsset> {
        let assets = self.channel_assets();
        let Some(latest) = assets.iter().map(|a| &a.version).max() else {
            return Vec::new();
        };
        let mut out: Vec<&ReleaseAsset> = assets
            .iter()
            .filter(|a| a.version == *latest)
            .collect();
        out.sort_by_key(|a| a.kind);
        for asset in &out {
            log::info!("    Discovered asset: {}", asset.file_name);
        }
        out
    }

    /// Apply the retention policy to a feed: sort full releases descending
    /// by version; if their count exceeds `keep_max_releases`, the version
    /// of the `keep_max_releases`-th entry becomes the cutoff and every
    /// asset of any type strictly below it is marked for deletion.
    ///
    /// `keep_max_releases == 0` disables retention. A delta whose base full
    /// release falls below the cutoff is deleted together with its base: the
    /// base of a delta at version `v` is the greatest full release strictly
    /// below `v`, so this affects exactly the deltas at the cutoff version
    /// itself (for any delta above the cutoff, the cutoff full release or a
    /// later one is its base and is retained).
    pub fn apply_retention(
        feed: &ReleaseFeed,
        keep_max_releases: usize,
    ) -> (ReleaseFeed, Vec<ReleaseAsset>) {
        if keep_max_releases == 0 {
            return (feed.clone(), Vec::new());
        }

        let mut fulls: Vec<&ReleaseAsset> = feed
            .assets
            .iter()
            .filter(|a| a.kind == AssetType::Full)
            .collect();
        fulls.sort_by(|a, b| b.version.cmp(&a.version));

        if fulls.len() <= keep_max_releases {
            log::info!(
                "Retention policy (keepMaxReleases={keep_max_releases}) not applied, only {} full release(s) present.",
                fulls.len()
            );
            return (feed.clone(), Vec::new());
        }

        let cutoff = fulls[keep_max_releases - 1].version.clone();
        let (kept, deleted): (Vec<_>, Vec<_>) = feed.assets.iter().cloned().partition(|a| {
            a.version > cutoff
                || (a.version == cutoff && a.kind != AssetType::Delta)
        });
        log::info!(
            "Retention policy (keepMaxReleases={keep_max_releases}) will delete {} release(s).",
            deleted.len()
        );
        (ReleaseFeed { assets: kept }, deleted)
    }
}

/// Scan a directory for release containers, grouped by channel.
///
/// Only full containers carry a manifest; a delta artifact is raw patch
/// bytes, so its identity is recovered by matching its file name against the
/// full releases found in the same directory.
fn releases_from_dir(dir: &Path) -> Result<BTreeMap<String, Vec<ReleaseAsset>>> {
    let mut releases: BTreeMap<String, Vec<ReleaseAsset>> = BTreeMap::new();
    if !dir.exists() {
        return Ok(releases);
    }
    let mut delta_paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).fs_context("listing release directory", dir)? {
        let entry = entry.fs_context("listing release directory", dir)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CONTAINER_EXT) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if AssetType::from_container_name(&name) == AssetType::Delta {
            delta_paths.push(path);
            continue;
        }
        let channel = ReleasePackage::new(&path).manifest()?.channel.clone();
        let asset = ReleaseAsset::from_container(&path)?;
        releases.entry(channel).or_default().push(asset);
    }
    for path in delta_paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identity = releases.iter().find_map(|(channel, assets)| {
            assets
                .iter()
                .filter(|a| a.kind == AssetType::Full)
                .find(|a| delta_names(a, channel).contains(&name))
                .map(|a| (channel.clone(), a.package_id.clone(), a.version.clone()))
        });
        match identity {
            Some((channel, id, version)) => {
                let asset = ReleaseAsset::from_file(&path, &id, &version, AssetType::Delta)?;
                releases.entry(channel).or_default().push(asset);
            }
            None => log::warn!(
                "Ignoring delta artifact {name}: no full release with a matching name in the directory."
            ),
        }
    }
    Ok(releases)
}

/// The file names a delta built alongside this full release may carry. The
/// default Windows channel omits the channel suffix, so both naming variants
/// are produced.
fn delta_names(full: &ReleaseAsset, channel: &str) -> [String; 2] {
    [
        suggested_release_name(&full.package_id, &full.version, channel, true, TargetOs::Windows),
        suggested_release_name(&full.package_id, &full.version, channel, true, TargetOs::Linux),
    ]
}

/// Name of the JSON feed file for a channel.
pub fn feed_file_name(channel: &str) -> String {
    format!("releases.{channel}.json")
}

/// Name of the legacy text feed for a channel. The default Windows channel
/// keeps the bare historical name.
pub fn legacy_file_name(channel: &str) -> String {
    if channel == TargetOs::Windows.default_channel() {
        "RELEASES".to_string()
    } else {
        format!("RELEASES-{channel}")
    }
}

/// Whether a file name is one of the published index files (JSON feed or
/// legacy text feed, any channel).
pub fn is_index_file(name: &str) -> bool {
    name.starts_with("RELEASES") || (name.starts_with("releases.") && name.ends_with(".json"))
}

/// Rewrite the published index of one channel. This is the single mutation
/// point of the authoritative index.
///
/// Freshly built `local` assets are merged over the existing JSON feed (local
/// wins on file-name collision), the retention policy is applied and pruned
/// artifact files are deleted from disk, then `releases.{channel}.json` and
/// the legacy `RELEASES[-{channel}]` file are rewritten. Assets whose version
/// the legacy format cannot represent are excluded from the legacy file only,
/// with a warning - never from the JSON feed.
///
/// Returns the feed as written.
pub fn update_release_files(
    release_dir: &Path,
    channel: &str,
    local: &ReleaseFeed,
    keep_max_releases: usize,
) -> Result<ReleaseFeed> {
    let json_path = release_dir.join(feed_file_name(channel));
    let existing = if json_path.is_file() {
        let json = std::fs::read_to_string(&json_path)
            .fs_context("reading release feed", &json_path)?;
        ReleaseFeed::from_json(&json)?
    } else {
        ReleaseFeed::default()
    };

    let merged = ReleaseFeed::merge(local, &existing);
    let (mut feed, deleted) =
        ReleaseEntryHelper::apply_retention(&merged, keep_max_releases);

    for asset in &deleted {
        let path = release_dir.join(&asset.file_name);
        log::info!("Retention: deleting {}", asset.file_name);
        match crate::packaging::utils::fs::retry_handle(|| std::fs::remove_file(&path)) {
            Ok(()) => {}
            // The asset may only ever have existed remotely.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).fs_context("deleting pruned asset", &path),
        }
    }

    feed.assets
        .sort_by(|a, b| b.version.cmp(&a.version).then(a.kind.cmp(&b.kind)));

    let excluded: Vec<&ReleaseAsset> = feed
        .assets
        .iter()
        .filter(|a| !a.legacy_compatible())
        .collect();
    if !excluded.is_empty() {
        log::warn!(
            "Excluding {} asset(s) from legacy {} file, their versions contain characters the format cannot represent: {}",
            excluded.len(),
            legacy_file_name(channel),
            excluded
                .iter()
                .map(|a| a.file_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    std::fs::write(&json_path, feed.to_json()?)
        .fs_context("writing release feed", &json_path)?;

    let legacy_path = release_dir.join(legacy_file_name(channel));
    std::fs::write(&legacy_path, feed.to_legacy_text())
        .fs_context("writing legacy feed", &legacy_path)?;

    Ok(feed)
}
