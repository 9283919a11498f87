//! File naming and gzip archival.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use chrono::Utc;
use flate2::{Compression, write::GzEncoder};

use crate::ARCHIVE_SUFFIX;

/// Create a fresh active log file `<prefix>_<timestamp>.log` in `dir`.
///
/// The name is claimed with `create_new`, so two rotations within the same
/// clock tick get distinct `-N` suffixes instead of clobbering each other.
pub(crate) fn create_active_file(dir: &Path, prefix: &str) -> io::Result<(File, PathBuf)> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{prefix}_{stamp}.log")
        } else {
            format!("{prefix}_{stamp}-{attempt}.log")
        };
        let path = dir.join(name);
        match OpenOptions::new().create_new(true).append(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Compress `src` into `archive_dir/<file name>.gz`.
///
/// Writes to a `.partial` file first, syncs it, then renames it into place.
/// `src` is never touched; the caller removes it once this returns `Ok`.
pub(crate) fn compress_into(src: &Path, archive_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(archive_dir)?;

    let base = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?
        .to_string_lossy()
        .into_owned();
    let target = free_archive_path(archive_dir, &base);
    let partial = target.with_file_name(format!(
        "{}.partial",
        target.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned())
    ));

    let result = write_gzip(src, &partial).and_then(|()| fs::rename(&partial, &target));
    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(target)
}

fn write_gzip(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let output = File::create(dest)?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let output = encoder
        .finish()?
        .into_inner()
        .map_err(io::IntoInnerError::into_error)?;
    output.sync_all()
}

fn free_archive_path(archive_dir: &Path, base: &str) -> PathBuf {
    let first = archive_dir.join(format!("{base}.{ARCHIVE_SUFFIX}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| archive_dir.join(format!("{base}-{n}.{ARCHIVE_SUFFIX}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn test_active_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (_a, a) = create_active_file(dir.path(), "hub").unwrap();
        let (_b, b) = create_active_file(dir.path(), "hub").unwrap();
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("hub_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_compress_preserves_bytes_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hub_1.log");
        let mut f = File::create(&src).unwrap();
        f.write_all(b"{\"a\":1}\n{\"b\":2}\n").unwrap();
        drop(f);

        let archive = dir.path().join("archive");
        let target = compress_into(&src, &archive).unwrap();
        assert_eq!(target, archive.join("hub_1.log.gz"));
        assert!(src.exists());

        let mut out = Vec::new();
        GzDecoder::new(File::open(&target).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"{\"a\":1}\n{\"b\":2}\n");

        let leftovers: Vec<_> = fs::read_dir(&archive)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_compress_does_not_overwrite_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hub_1.log");
        fs::write(&src, b"x\n").unwrap();
        let archive = dir.path().join("archive");

        let first = compress_into(&src, &archive).unwrap();
        let second = compress_into(&src, &archive).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, archive.join("hub_1.log-1.gz"));
    }
}
