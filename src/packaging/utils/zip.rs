//! Zip helpers for portable archives.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::super::error::{Error, ErrorExt, Result};
use super::progress::ProgressFn;

/// Zip the contents of a directory (not the directory itself) into `output`.
///
/// Entries are added in sorted path order for deterministic archives.
pub fn zip_dir(src: &Path, output: &Path, progress: &ProgressFn) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
    }
    let file = File::create(output).fs_context("creating archive", output)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<_> = walkdir::WalkDir::new(src)
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
            .strip_prefix(src)
            .map_err(|e| Error::GenericError(format!("path escape: {e}")))?;
        zip.start_file(rel.to_string_lossy().replace('\\', "/"), options)?;
        let mut f = File::open(entry.path()).fs_context("opening file", entry.path())?;
        std::io::copy(&mut f, &mut zip).fs_context("archiving file", entry.path())?;
        progress((((i + 1) * 100) / total) as u8);
    }

    zip.finish()?;
    progress(100);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), b"alpha").unwrap();
        std::fs::write(src.join("nested/b.bin"), [0u8, 1, 2, 3]).unwrap();

        let archive = tmp.path().join("out.zip");
        let progress: ProgressFn = std::sync::Arc::new(|_| {});
        zip_dir(&src, &archive, &progress).unwrap();

        let dest = tmp.path().join("dest");
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        zip.extract(&dest).unwrap();
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dest.join("nested/b.bin")).unwrap(), [0, 1, 2, 3]);
    }
}
