//! Bootstrapper embedding.
//!
//! A bootstrapper executable carries an 80-byte placeholder: a 64-byte
//! constant signature followed by 8 reserved bytes for the payload offset
//! and 8 for the payload length (little-endian, zero until embedding).
//! [`create_bundle`] appends a release container to the bootstrapper and
//! patches the reserved bytes in place, producing a self-contained
//! installer; [`is_bundle`] recovers the embedded offset/length later.
//!
//! The signature is located with a Knuth-Morris-Pratt search over a
//! memory-mapped view, so the (potentially large) executable is never
//! loaded into addressable memory twice and the search is linear-time
//! regardless of payload content. The search during embedding is scoped to
//! the original bootstrapper region, so a signature occurring byte-for-byte
//! inside the appended payload can never match.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use memmap2::{Mmap, MmapMut};

use super::error::{Error, ErrorExt, Result};
use super::utils::fs::{retry_handle, retry_io};

/// The 64-byte placeholder signature compiled into every bootstrapper
/// template (SHA-512 of "relpack setup bundle").
pub const BUNDLE_SIGNATURE: [u8; 64] = [
    0x3e, 0xa1, 0x5c, 0x08, 0xd4, 0x27, 0xb9, 0x6f, //
    0x81, 0x0a, 0xc3, 0x55, 0x9e, 0x72, 0x2d, 0xe8, //
    0x4b, 0xd6, 0x39, 0xf0, 0x17, 0xaa, 0x64, 0x8d, //
    0xc2, 0x0e, 0x7b, 0x91, 0x5f, 0x3c, 0xe6, 0x28, //
    0xb4, 0x6d, 0x02, 0xd9, 0x8a, 0x41, 0xfe, 0x1b, //
    0x76, 0xcd, 0x30, 0x93, 0x58, 0xe7, 0x0c, 0xaf, //
    0x25, 0xba, 0x49, 0xf6, 0x13, 0x87, 0xdc, 0x60, //
    0x9d, 0x34, 0xeb, 0x06, 0x7a, 0xc8, 0x52, 0xa3, //
];

/// Total size of the placeholder: signature plus offset and length fields.
pub const PLACEHOLDER_LEN: usize = BUNDLE_SIGNATURE.len() + 16;

/// KMP failure function, as on the classic formulation: `table[i]` is the
/// width of the longest proper border of `pattern[..i]`, with `table[0] = -1`.
fn failure_table(pattern: &[u8]) -> Vec<i64> {
    let mut table = vec![0i64; pattern.len()];
    if !pattern.is_empty() {
        table[0] = -1;
    }

    let mut pos = 2;
    let mut cnd = 0usize;
    while pos < pattern.len() {
        if pattern[pos - 1] == pattern[cnd] {
            table[pos] = cnd as i64 + 1;
            cnd += 1;
            pos += 1;
        } else if cnd > 0 {
            cnd = table[cnd] as usize;
        } else {
            table[pos] = 0;
            pos += 1;
        }
    }
    table
}

/// Exact byte-pattern search, linear in `haystack.len()` for any input.
/// Returns the first match position.
pub fn kmp_find(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > haystack.len() {
        return None;
    }
    let table = failure_table(pattern);
    let mut m = 0usize;
    let mut i = 0usize;

    while m + i < haystack.len() {
        if pattern[i] == haystack[m + i] {
            if i == pattern.len() - 1 {
                return Some(m);
            }
            i += 1;
        } else if table[i] > -1 {
            m = m + i - table[i] as usize;
            i = table[i] as usize;
        } else {
            m += 1;
            i = 0;
        }
    }
    None
}

/// Embed `payload` into the bootstrapper at `output`, returning the byte
/// offset at which the payload begins.
///
/// If `bootstrapper` is not already positioned at `output` it is copied
/// there first, so the pristine template survives for the next build. After
/// patching, the result is re-verified via [`is_bundle`]; a mismatch is a
/// fatal internal-consistency error indicating a bootstrapper template that
/// does not carry the expected placeholder layout.
pub fn create_bundle(bootstrapper: &Path, payload: &Path, output: &Path) -> Result<u64> {
    if !bootstrapper.is_file() {
        return Err(Error::user_info(format!(
            "Bootstrapper template not found: {bootstrapper:?}"
        )));
    }
    if !payload.is_file() {
        return Err(Error::user_info(format!(
            "Payload package not found: {payload:?}"
        )));
    }

    if bootstrapper != output {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
        }
        retry_io(|| std::fs::copy(bootstrapper, output).map(|_| ()))
            .fs_context("copying bootstrapper template", output)?;
    }

    // Append the payload and record where it starts.
    let (offset, length) = {
        let mut setup = retry_io(|| OpenOptions::new().append(true).open(output))
            .fs_context("opening setup for append", output)?;
        let offset = setup
            .seek(SeekFrom::End(0))
            .fs_context("seeking to end of setup", output)?;
        let mut pkg =
            retry_io(|| File::open(payload)).fs_context("opening payload package", payload)?;
        let length =
            std::io::copy(&mut pkg, &mut setup).fs_context("appending payload", output)?;
        (offset, length)
    };

    // Patch the placeholder in the original bootstrapper region. Searching
    // only [0, offset) guarantees a signature occurring inside the payload
    // cannot match.
    let file = retry_io(|| OpenOptions::new().read(true).write(true).open(output))
        .fs_context("opening setup for patching", output)?;
    let mut map =
        unsafe { MmapMut::map_mut(&file) }.fs_context("memory-mapping setup", output)?;

    let search_region = &map[..offset as usize];
    let pos = kmp_find(search_region, &BUNDLE_SIGNATURE)
        .ok_or_else(|| Error::PlaceholderNotFound(output.to_path_buf()))?;
    if pos + PLACEHOLDER_LEN > offset as usize {
        return Err(Error::PlaceholderNotFound(output.to_path_buf()));
    }

    let fields = pos + BUNDLE_SIGNATURE.len();
    map[fields..fields + 8].copy_from_slice(&offset.to_le_bytes());
    map[fields + 8..fields + 16].copy_from_slice(&length.to_le_bytes());
    map.flush().fs_context("flushing patched header", output)?;
    drop(map);

    // A memory-mapped write does not touch the last-modified timestamp, and
    // some installers rely on it for cache invalidation.
    retry_handle(|| file.set_modified(SystemTime::now()))
        .fs_context("updating setup timestamp", output)?;
    drop(file);

    match is_bundle(output)? {
        Some((o, l)) if o == offset && l == length => Ok(offset),
        other => Err(Error::BundleVerification(format!(
            "wrote offset={offset} length={length} but read back {other:?}; the bootstrapper \
             template does not match this build toolchain"
        ))),
    }
}

/// Locate the placeholder in `path` and read back the embedded payload
/// offset and length.
///
/// Returns `Ok(None)` for a pristine (un-embedded) template whose reserved
/// fields are still zero, and an error if the file carries no signature at
/// all. The first signature match is always the patched header: the header
/// precedes any appended payload bytes.
pub fn is_bundle(path: &Path) -> Result<Option<(u64, u64)>> {
    let file = retry_handle(|| File::open(path)).fs_context("opening bundle", path)?;
    let map = unsafe { Mmap::map(&file) }.fs_context("memory-mapping bundle", path)?;

    let pos =
        kmp_find(&map, &BUNDLE_SIGNATURE).ok_or_else(|| Error::PlaceholderNotFound(path.to_path_buf()))?;
    if pos + PLACEHOLDER_LEN > map.len() {
        return Err(Error::PlaceholderNotFound(path.to_path_buf()));
    }

    let fields = pos + BUNDLE_SIGNATURE.len();
    let offset = read_le_u64(&map[fields..fields + 8]);
    let length = read_le_u64(&map[fields + 8..fields + 16]);

    if offset == 0 && length == 0 {
        return Ok(None);
    }
    Ok(Some((offset, length)))
}

fn read_le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Recover the embedded release container from a setup bundle.
pub fn extract_bundle(path: &Path, dest: &Path) -> Result<()> {
    let (offset, length) = is_bundle(path)?.ok_or_else(|| {
        Error::user_info(format!(
            "{path:?} is a bootstrapper template with no embedded package"
        ))
    })?;

    let file = retry_handle(|| File::open(path)).fs_context("opening bundle", path)?;
    let map = unsafe { Mmap::map(&file) }.fs_context("memory-mapping bundle", path)?;
    let end = offset
        .checked_add(length)
        .filter(|end| *end <= map.len() as u64)
        .ok_or_else(|| {
            Error::GenericError(format!(
                "bundle header of {path:?} points past the end of the file"
            ))
        })?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).fs_context("creating output directory", parent)?;
    }
    retry_io(|| std::fs::write(dest, &map[offset as usize..end as usize]))
        .fs_context("writing extracted package", dest)?;
    Ok(())
}

/// Build a synthetic bootstrapper template: arbitrary machine-code-like
/// bytes with the placeholder region embedded at `placeholder_at`.
#[cfg(test)]
pub(crate) fn fake_bootstrapper(total_len: usize, placeholder_at: usize) -> Vec<u8> {
    assert!(placeholder_at + PLACEHOLDER_LEN <= total_len);
    let mut bytes: Vec<u8> = (0..total_len).map(|i| (i * 31 % 251) as u8).collect();
    bytes[placeholder_at..placeholder_at + BUNDLE_SIGNATURE.len()]
        .copy_from_slice(&BUNDLE_SIGNATURE);
    for b in &mut bytes[placeholder_at + BUNDLE_SIGNATURE.len()..placeholder_at + PLACEHOLDER_LEN]
    {
        *b = 0;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmp_finds_pattern_at_start() {
        let hay = b"abcabdxyz";
        assert_eq!(kmp_find(hay, b"abcab"), Some(0));
    }

    #[test]
    fn kmp_finds_pattern_at_last_possible_offset() {
        let hay = b"xxxxxabc";
        assert_eq!(kmp_find(hay, b"abc"), Some(5));
    }

    #[test]
    fn kmp_returns_none_when_absent() {
        assert_eq!(kmp_find(b"aaaaaaab", b"abc"), None);
        assert_eq!(kmp_find(b"ab", b"abc"), None);
        assert_eq!(kmp_find(b"", b"a"), None);
    }

    #[test]
    fn kmp_handles_self_similar_patterns() {
        // Patterns with repeated prefixes exercise the failure table.
        let hay = b"aabaaabaabaaabaab";
        assert_eq!(kmp_find(hay, b"aabaab"), Some(4));
        assert_eq!(kmp_find(hay, b"aaab"), Some(3));
    }

    #[test]
    fn pristine_template_reports_not_a_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Setup.exe");
        std::fs::write(&path, fake_bootstrapper(4096, 1000)).unwrap();
        assert_eq!(is_bundle(&path).unwrap(), None);
    }

    #[test]
    fn file_without_signature_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("NotSetup.exe");
        std::fs::write(&path, vec![0x5au8; 4096]).unwrap();
        assert!(matches!(
            is_bundle(&path),
            Err(Error::PlaceholderNotFound(_))
        ));
    }

    #[test]
    fn create_bundle_patches_header_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("Setup.template");
        let payload = tmp.path().join("pkg.relpkg");
        let output = tmp.path().join("MyApp-Setup.exe");

        let template_bytes = fake_bootstrapper(8192, 512);
        std::fs::write(&template, &template_bytes).unwrap();
        let payload_bytes: Vec<u8> = (0..3000).map(|i| (i % 256) as u8).collect();
        std::fs::write(&payload, &payload_bytes).unwrap();

        let offset = create_bundle(&template, &payload, &output).unwrap();
        assert_eq!(offset, template_bytes.len() as u64);

        let (o, l) = is_bundle(&output).unwrap().unwrap();
        assert_eq!(o, offset);
        assert_eq!(l, payload_bytes.len() as u64);

        // The appended region is the payload verbatim.
        let all = std::fs::read(&output).unwrap();
        assert_eq!(&all[o as usize..o as usize + l as usize], &payload_bytes[..]);
        // The template survives untouched.
        assert_eq!(std::fs::read(&template).unwrap(), template_bytes);
    }

    #[test]
    fn signature_inside_payload_does_not_confuse_embedding() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("Setup.template");
        let payload = tmp.path().join("pkg.relpkg");
        let output = tmp.path().join("Setup.exe");

        std::fs::write(&template, fake_bootstrapper(4096, 2048)).unwrap();
        // Payload starts with a byte-for-byte copy of the signature.
        let mut payload_bytes = BUNDLE_SIGNATURE.to_vec();
        payload_bytes.extend_from_slice(&[0u8; 16]);
        payload_bytes.extend_from_slice(b"payload tail");
        std::fs::write(&payload, &payload_bytes).unwrap();

        let offset = create_bundle(&template, &payload, &output).unwrap();
        let (o, l) = is_bundle(&output).unwrap().unwrap();
        assert_eq!((o, l), (offset, payload_bytes.len() as u64));
    }

    #[test]
    fn placeholder_at_very_start_of_template() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("Setup.template");
        let payload = tmp.path().join("pkg.relpkg");
        let output = tmp.path().join("Setup.exe");

        std::fs::write(&template, fake_bootstrapper(PLACEHOLDER_LEN + 64, 0)).unwrap();
        std::fs::write(&payload, b"tiny").unwrap();

        let offset = create_bundle(&template, &payload, &output).unwrap();
        assert_eq!(is_bundle(&output).unwrap(), Some((offset, 4)));
    }

    #[test]
    fn extract_recovers_exact_payload_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("Setup.template");
        let payload = tmp.path().join("pkg.relpkg");
        let output = tmp.path().join("Setup.exe");
        let recovered = tmp.path().join("recovered.relpkg");

        std::fs::write(&template, fake_bootstrapper(4096, 100)).unwrap();
        let payload_bytes: Vec<u8> = (0u32..5000).map(|i| (i.wrapping_mul(7) % 256) as u8).collect();
        std::fs::write(&payload, &payload_bytes).unwrap();

        create_bundle(&template, &payload, &output).unwrap();
        extract_bundle(&output, &recovered).unwrap();
        assert_eq!(std::fs::read(&recovered).unwrap(), payload_bytes);
    }
}
