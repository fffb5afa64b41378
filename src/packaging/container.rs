//! On-disk package container format.
//!
//! A container is a zip archive holding a `manifest.json` (id, version,
//! channel, entry-point name) plus the application payload under `app/`.
//! [`ReleasePackage`] wraps a container path and parses the manifest lazily.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use semver::Version;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::{Error, ErrorExt, Result};
use super::utils::progress::ProgressFn;

/// Name of the manifest entry inside a container.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Root directory of the payload inside a container.
pub const PAYLOAD_PREFIX: &str = "app";

/// Container manifest: the identity of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package id
    pub id: String,
    /// Release version
    pub version: Version,
    /// Release channel this container was built for
    pub channel: String,
    /// File name of the main application executable inside the payload
    pub main_exe: String,
    /// Release notes in markdown, if provided at pack time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_markdown: Option<String>,
    /// Release notes rendered to HTML, if available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_html: Option<String>,
}

/// A release container on disk, with a lazily-parsed manifest.
#[derive(Debug)]
pub struct ReleasePackage {
    path: PathBuf,
    manifest: OnceLock<Manifest>,
}

impl ReleasePackage {
    /// Wrap a container path. The file is not touched until the manifest is
    /// first requested.
    pub fn new(path: impl Into<PathBuf>) -> ReleasePackage {
        ReleasePackage {
            path: path.into(),
            manifest: OnceLock::new(),
        }
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The container manifest, read from the archive on first access.
    pub fn manifest(&self) -> Result<&Manifest> {
        if let Some(m) = self.manifest.get() {
            return Ok(m);
        }
        let manifest = read_manifest(&self.path)?;
        Ok(self.manifest.get_or_init(|| manifest))
    }

    /// The release version recorded in the container manifest.
    pub fn version(&self) -> Result<Version> {
        Ok(self.manifest()?.version.clone())
    }
}

/// Read and parse the manifest of a container without retaining the archive.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let file = File::open(path).fs_context("opening container", path)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut entry = zip.by_name(MANIFEST_NAME).map_err(|_| {
        Error::GenericError(format!(
            "container {path:?} has no {MANIFEST_NAME} - not a valid release container"
        ))
    })?;
    let mut json = String::new();
    entry
        .read_to_string(&mut json)
        .fs_context("reading container manifest", path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Create a release container from a staged payload directory.
///
/// Files are added in sorted path order so identical inputs produce
/// identical archives.
pub fn create_container(
    manifest: &Manifest,
    payload_dir: &Path,
    output: &Path,
    progress: &ProgressFn,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
    }
    let file = File::create(output).fs_context("creating container", output)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_NAME, options)?;
    zip.write_all(serde_json::to_string_pretty(manifest)?.as_bytes())
        .fs_context("writing container manifest", output)?;

    let mut entries: Vec<_> = walkdir::WalkDir::new(payload_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    entries.sort_by_key(|e| e.path().to_path_buf());

    let total = entries.len().max(1);
    for (i, entry) in entries.iter().enumerate() {
        let rel = entry
            .path()
            .strip_prefix(payload_dir)
            .map_err(|e| Error::GenericError(format!("payload path escape: {e}")))?;
        let name = format!(
            "{PAYLOAD_PREFIX}/{}",
            rel.to_string_lossy().replace('\\', "/")
        );
        zip.start_file(name, options)?;
        let mut src =
            File::open(entry.path()).fs_context("opening payload file", entry.path())?;
        std::io::copy(&mut src, &mut zip).fs_context("archiving payload file", entry.path())?;
        progress((((i + 1) * 100) / total) as u8);
    }

    zip.finish()?;
    progress(100);
    Ok(())
}

/// Extract a container's payload and manifest into a directory.
pub fn extract_container(path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(path).fs_context("opening container", path)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    std::fs::create_dir_all(dest).fs_context("creating extraction directory", dest)?;
    zip.extract(dest)?;
    Ok(())
}
