//! Versioned release-asset model and feed.
//!
//! A [`ReleaseAsset`] describes one produced artifact; a [`ReleaseFeed`] is
//! the JSON index of all assets published for one channel. A legacy
//! single-line-per-asset text format is emitted alongside for backward
//! compatibility (write-only; JSON is authoritative).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::container::ReleasePackage;
use super::error::{ErrorExt, Result};

/// File extension used by full and delta release containers.
pub const CONTAINER_EXT: &str = "relpkg";

/// Target operating system of a release run.
///
/// Each OS has one default channel; channels partition independent update
/// tracks and never intermix in selection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum TargetOs {
    /// Microsoft Windows
    Windows,
    /// Apple macOS
    Osx,
    /// Linux distributions
    Linux,
}

impl TargetOs {
    /// The OS relpack itself is running on.
    pub fn current() -> TargetOs {
        if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::Osx
        } else {
            TargetOs::Linux
        }
    }

    /// Short name used in channel defaults and messages.
    pub fn short_name(&self) -> &'static str {
        match self {
            TargetOs::Windows => "win",
            TargetOs::Osx => "osx",
            TargetOs::Linux => "linux",
        }
    }

    /// The default release channel for this OS.
    pub fn default_channel(&self) -> &'static str {
        self.short_name()
    }
}

impl std::fmt::Display for TargetOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// The kind of artifact a [`ReleaseAsset`] describes.
///
/// The derived ordering (declaration order) is the feed display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AssetType {
    /// A complete, self-sufficient release container
    Full,
    /// A binary patch transforming the previous full release into this one
    Delta,
    /// A portable application archive
    Portable,
    /// A self-contained setup executable
    Installer,
    /// An MSI deployment helper package
    MsiDeploymentTool,
}

impl AssetType {
    /// Infer Full/Delta from a container file name (`*-delta.relpkg`).
    pub fn from_container_name(file_name: &str) -> AssetType {
        let stem = file_name
            .strip_suffix(&format!(".{CONTAINER_EXT}"))
            .unwrap_or(file_name);
        if stem.to_ascii_lowercase().ends_with("-delta") {
            AssetType::Delta
        } else {
            AssetType::Full
        }
    }
}

/// One produced release artifact.
///
/// Created once when its artifact is produced, immutable thereafter, and
/// removed only by the retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// The name or Id of the package containing this release
    #[serde(rename = "PackageId")]
    pub package_id: String,

    /// The version of this release
    #[serde(rename = "Version")]
    pub version: Version,

    /// The type of asset (eg. full or delta)
    #[serde(rename = "Type")]
    pub kind: AssetType,

    /// The file name of the artifact; the dedup key across feed merges
    #[serde(rename = "FileName")]
    pub file_name: String,

    /// Hex-encoded SHA1 checksum of the artifact
    #[serde(rename = "SHA1")]
    pub sha1: String,

    /// Hex-encoded SHA256 checksum of the artifact
    #[serde(rename = "SHA256")]
    pub sha256: String,

    /// Size of the artifact in bytes
    #[serde(rename = "Size")]
    pub size: u64,

    /// Release notes in markdown, as passed when packaging the release
    #[serde(rename = "NotesMarkdown", default)]
    pub notes_markdown: Option<String>,

    /// Release notes rendered to HTML, if available
    #[serde(rename = "NotesHTML", default)]
    pub notes_html: Option<String>,
}

impl ReleaseAsset {
    /// Build an asset from a release container on disk.
    ///
    /// Opens the container, reads its manifest, and computes content hashes
    /// and size. Full vs delta is inferred from the file name suffix.
    pub fn from_container(path: &Path) -> Result<ReleaseAsset> {
        let pkg = ReleasePackage::new(path);
        let manifest = pkg.manifest()?;
        let file_name = file_name_of(path);
        let (sha1, sha256, size) = hash_file(path)?;

        Ok(ReleaseAsset {
            package_id: manifest.id.clone(),
            version: manifest.version.clone(),
            kind: AssetType::from_container_name(&file_name),
            file_name,
            sha1,
            sha256,
            size,
            notes_markdown: manifest.notes_markdown.clone(),
            notes_html: manifest.notes_html.clone(),
        })
    }

    /// Build an asset of an explicit kind from an arbitrary artifact file
    /// (portable archives, setup executables).
    pub fn from_file(
        path: &Path,
        package_id: &str,
        version: &Version,
        kind: AssetType,
    ) -> Result<ReleaseAsset> {
        let (sha1, sha256, size) = hash_file(path)?;
        Ok(ReleaseAsset {
            package_id: package_id.to_string(),
            version: version.clone(),
            kind,
            file_name: file_name_of(path),
            sha1,
            sha256,
            size,
            notes_markdown: None,
            notes_html: None,
        })
    }

    /// One line of the legacy text feed: `<sha1> <filename> <size>`.
    pub fn legacy_entry(&self) -> String {
        format!("{} {} {}", self.sha1, self.file_name, self.size)
    }

    /// Whether this asset's version can be represented in the legacy text
    /// format. Build metadata and dotted pre-release labels cannot.
    pub fn legacy_compatible(&self) -> bool {
        self.version.build.is_empty() && !self.version.pre.contains('.')
    }
}

/// An unordered collection of assets scoped to one release channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFeed {
    /// The assets available in this feed
    #[serde(rename = "Assets", default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseFeed {
    /// Parse a feed from its JSON representation.
    pub fn from_json(json: &str) -> Result<ReleaseFeed> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the feed to its stable JSON representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set union keyed by `FileName`; entries in `priority` shadow
    /// same-named entries in `secondary`.
    ///
    /// Used to combine freshly-built local assets with a previously
    /// published remote feed without duplication.
    pub fn merge(priority: &ReleaseFeed, secondary: &ReleaseFeed) -> ReleaseFeed {
        let mut seen = std::collections::HashSet::new();
        let mut assets = Vec::new();
        for asset in priority.assets.iter().chain(secondary.assets.iter()) {
            if seen.insert(asset.file_name.clone()) {
                assets.push(asset.clone());
            }
        }
        ReleaseFeed { assets }
    }

    /// The legacy text feed: one line per full/delta asset. Assets whose
    /// version the legacy format cannot represent are skipped (the JSON feed
    /// keeps them).
    pub fn to_legacy_text(&self) -> String {
        let mut out = String::new();
        for asset in self
            .assets
            .iter()
            .filter(|a| matches!(a.kind, AssetType::Full | AssetType::Delta))
            .filter(|a| a.legacy_compatible())
        {
            out.push_str(&asset.legacy_entry());
            out.push('\n');
        }
        out
    }
}

/// Suggested container file name for a full or delta release.
///
/// The default Windows channel omits the channel suffix, matching the
/// historical naming of existing feeds.
pub fn suggested_release_name(
    id: &str,
    version: &Version,
    channel: &str,
    delta: bool,
    os: TargetOs,
) -> String {
    let kind = if delta { "delta" } else { "full" };
    if os == TargetOs::Windows && channel == TargetOs::Windows.default_channel() {
        format!("{id}-{version}-{kind}.{CONTAINER_EXT}")
    } else {
        format!("{id}-{version}-{channel}-{kind}.{CONTAINER_EXT}")
    }
}

/// Suggested file name for the portable artifact.
pub fn suggested_portable_name(id: &str, channel: &str) -> String {
    format!("{id}-{channel}-Portable.zip")
}

/// Suggested file name for the setup artifact, or `None` on platforms that
/// ship only portable/full artifacts.
pub fn suggested_setup_name(id: &str, channel: &str, os: TargetOs) -> Option<String> {
    match os {
        TargetOs::Windows => Some(format!("{id}-{channel}-Setup.exe")),
        TargetOs::Osx => Some(format!("{id}-{channel}-Setup")),
        TargetOs::Linux => None,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compute SHA1 and SHA256 of a file in one streaming pass.
fn hash_file(path: &Path) -> Result<(String, String, u64)> {
    let mut file = File::open(path).fs_context("opening file for hashing", path)?;
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut size = 0u64;
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .fs_context("reading file for hash calculation", path)?;
        if n == 0 {
            break;
        }
        sha1.update(&buffer[..n]);
        sha256.update(&buffer[..n]);
        size += n as u64;
    }

    Ok((
        hex::encode(sha1.finalize()),
        hex::encode(sha256.finalize()),
        size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, version: &str, kind: AssetType) -> ReleaseAsset {
        ReleaseAsset {
            package_id: "MyApp".into(),
            version: Version::parse(version).unwrap(),
            kind,
            file_name: name.into(),
            sha1: "da39a3ee5e6b4b0d3255bfef95601890afd80709".into(),
            sha256: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".into(),
            size: 42,
            notes_markdown: None,
            notes_html: None,
        }
    }

    #[test]
    fn feed_json_round_trip_is_lossless() {
        let feed = ReleaseFeed {
            assets: vec![
                ReleaseAsset {
                    notes_markdown: Some("# notes".into()),
                    notes_html: Some("<h1>notes</h1>".into()),
                    ..asset("MyApp-1.0.0-full.relpkg", "1.0.0", AssetType::Full)
                },
                asset("MyApp-1.0.0-delta.relpkg", "1.0.0", AssetType::Delta),
            ],
        };
        let json = feed.to_json().unwrap();
        let parsed = ReleaseFeed::from_json(&json).unwrap();
        assert_eq!(feed, parsed);
    }

    #[test]
    fn feed_json_uses_wire_field_names() {
        let feed = ReleaseFeed {
            assets: vec![asset("a.relpkg", "1.2.3", AssetType::Full)],
        };
        let json = feed.to_json().unwrap();
        for key in [
            "\"Assets\"",
            "\"PackageId\"",
            "\"Version\"",
            "\"Type\"",
            "\"FileName\"",
            "\"SHA1\"",
            "\"SHA256\"",
            "\"Size\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
        assert!(json.contains("\"Full\""));
    }

    #[test]
    fn merge_dedups_by_file_name_with_priority_winning() {
        let mut local_a = asset("A.relpkg", "1.0.0", AssetType::Full);
        local_a.size = 1;
        let mut remote_a = asset("A.relpkg", "1.0.0", AssetType::Full);
        remote_a.size = 2;

        let local = ReleaseFeed {
            assets: vec![local_a.clone(), asset("B.relpkg", "1.0.0", AssetType::Full)],
        };
        let remote = ReleaseFeed {
            assets: vec![remote_a, asset("C.relpkg", "1.0.0", AssetType::Full)],
        };

        let merged = ReleaseFeed::merge(&local, &remote);
        assert_eq!(merged.assets.len(), 3);
        let a = merged
            .assets
            .iter()
            .find(|x| x.file_name == "A.relpkg")
            .unwrap();
        assert_eq!(a.size, 1, "local asset must shadow the remote one");
    }

    #[test]
    fn legacy_text_skips_unrepresentable_versions_and_non_packages() {
        let feed = ReleaseFeed {
            assets: vec![
                asset("ok-full.relpkg", "1.0.0", AssetType::Full),
                asset("meta-full.relpkg", "1.0.1+build.5", AssetType::Full),
                asset("pre-full.relpkg", "1.0.2-rc.1", AssetType::Full),
                asset("portable.zip", "1.0.0", AssetType::Portable),
            ],
        };
        let text = feed.to_legacy_text();
        assert!(text.contains("ok-full.relpkg 42"));
        assert!(!text.contains("meta-full.relpkg"));
        assert!(!text.contains("pre-full.relpkg"), "dotted prerelease label");
        assert!(!text.contains("portable.zip"));
    }

    #[test]
    fn container_name_kind_inference() {
        assert_eq!(
            AssetType::from_container_name("App-1.0.0-delta.relpkg"),
            AssetType::Delta
        );
        assert_eq!(
            AssetType::from_container_name("App-1.0.0-full.relpkg"),
            AssetType::Full
        );
    }

    #[test]
    fn windows_default_channel_omits_suffix() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(
            suggested_release_name("App", &v, "win", false, TargetOs::Windows),
            "App-1.2.3-full.relpkg"
        );
        assert_eq!(
            suggested_release_name("App", &v, "beta", true, TargetOs::Windows),
            "App-1.2.3-beta-delta.relpkg"
        );
        assert_eq!(
            suggested_release_name("App", &v, "linux", false, TargetOs::Linux),
            "App-1.2.3-linux-full.relpkg"
        );
    }
}
