//! Upload/download collaborator contracts.
//!
//! The builder talks to remote asset stores only through [`AssetRepository`];
//! transports live behind this boundary. [`LocalRepository`] is the default
//! filesystem backend and the one exercised by tests.

use std::future::Future;
use std::path::{Path, PathBuf};

use super::asset::ReleaseFeed;
use super::entries::{self, ReleaseEntryHelper};
use super::error::{Error, ErrorExt, Result};
use super::utils::fs::retry_io;

/// A store that mirrors published release assets.
///
/// Uploads are idempotent by file name: an asset already present in the
/// store is never re-sent.
#[allow(async_fn_in_trait)]
pub trait AssetRepository {
    /// Push every asset in `feed` that the store does not yet hold, reading
    /// artifact bytes from `release_dir`, then refresh the store's index
    /// files.
    async fn upload_missing_assets(&self, feed: &ReleaseFeed, release_dir: &Path) -> Result<()>;

    /// Fetch the latest full release container of `channel` into `dest`.
    /// Returns `None` when the channel has no full release yet.
    async fn download_latest_full_package(
        &self,
        channel: &str,
        dest: &Path,
    ) -> Result<Option<PathBuf>>;
}

/// Run `op`, retrying exactly once on a transient failure. User-actionable
/// errors and cancellation are surfaced immediately.
pub async fn retry_once<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(e @ (Error::UserInfo(_) | Error::Cancelled)) => Err(e),
        Err(first) => {
            log::warn!("transient failure, retrying once: {first}");
            op().await
        }
    }
}

/// Filesystem-backed asset store rooted at a directory.
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    /// Open (creating if needed) a repository at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<LocalRepository> {
        let root = root.into();
        std::fs::create_dir_all(&root).fs_context("creating repository root", &root)?;
        Ok(LocalRepository { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetRepository for LocalRepository {
    async fn upload_missing_assets(&self, feed: &ReleaseFeed, release_dir: &Path) -> Result<()> {
        for asset in &feed.assets {
            let dest = self.root.join(&asset.file_name);
            if dest.exists() {
                log::debug!("asset already uploaded, skipping: {}", asset.file_name);
                continue;
            }
            let src = release_dir.join(&asset.file_name);
            log::info!("Uploading {}", asset.file_name);
            retry_io(|| std::fs::copy(&src, &dest).map(|_| ()))
                .fs_context("uploading asset", &src)?;
        }

        // Index files are small and always re-sent in full.
        for entry in
            std::fs::read_dir(release_dir).fs_context("listing release directory", release_dir)?
        {
            let entry = entry.fs_context("listing release directory", release_dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entries::is_index_file(&name) {
                let dest = self.root.join(&name);
                retry_io(|| std::fs::copy(entry.path(), &dest).map(|_| ()))
                    .fs_context("uploading index file", &entry.path())?;
            }
        }
        Ok(())
    }

    async fn download_latest_full_package(
        &self,
        channel: &str,
        dest: &Path,
    ) -> Result<Option<PathBuf>> {
        let helper = ReleaseEntryHelper::new(&self.root, channel)?;
        let Some(latest) = helper.get_latest_full_release() else {
            return Ok(None);
        };
        let src = self.root.join(&latest.file_name);
        let target = dest.join(&latest.file_name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).fs_context("creating download directory", parent)?;
        }
        retry_io(|| std::fs::copy(&src, &target).map(|_| ()))
            .fs_context("downloading package", &src)?;
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packaging::asset::{AssetType, ReleaseAsset};
    use semver::Version;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            package_id: "MyApp".into(),
            version: Version::parse("1.0.0").unwrap(),
            kind: AssetType::Full,
            file_name: name.into(),
            sha1: String::new(),
            sha256: String::new(),
            size: 0,
            notes_markdown: None,
            notes_html: None,
        }
    }

    #[tokio::test]
    async fn upload_skips_assets_already_present() {
        let tmp = tempfile::tempdir().unwrap();
        let releases = tmp.path().join("releases");
        let store = tmp.path().join("store");
        std::fs::create_dir_all(&releases).unwrap();
        std::fs::write(releases.join("a.relpkg"), b"fresh").unwrap();
        std::fs::write(releases.join("b.relpkg"), b"fresh").unwrap();

        let repo = LocalRepository::new(&store).unwrap();
        std::fs::write(store.join("a.relpkg"), b"already-there").unwrap();

        let feed = ReleaseFeed {
            assets: vec![asset("a.relpkg"), asset("b.relpkg")],
        };
        repo.upload_missing_assets(&feed, &releases).await.unwrap();

        // Present asset untouched, missing asset copied.
        assert_eq!(std::fs::read(store.join("a.relpkg")).unwrap(), b"already-there");
        assert_eq!(std::fs::read(store.join("b.relpkg")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn download_returns_none_for_empty_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(tmp.path().join("store")).unwrap();
        let got = repo
            .download_latest_full_package("win", &tmp.path().join("dl"))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn retry_once_retries_transient_but_not_user_errors() {
        let calls = AtomicU32::new(0);
        let out: Result<u32> = retry_once(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::GenericError("flaky".into()))
                } else {
                    Ok(5)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = AtomicU32::new(0);
        let out: Result<u32> = retry_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::user_info("fix your input")) }
        })
        .await;
        assert!(matches!(out, Err(Error::UserInfo(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
