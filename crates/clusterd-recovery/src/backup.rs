//! Tarball creation and extraction, grounded structurally on the pack's
//! database backup module (`harborgrid-justin-caddy::database::backup`)
//! for the gzip+tar shape, with the path-traversal rejection spec §4.7
//! requires on every extracted entry name.

use std::fs::File;
use std::path::{Path, PathBuf};

use clusterd_core::{DaemonError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;

/// Writes every file under `source_dir` into a gzip tarball at `dest`,
/// skipping any path for which `skip` returns true (used to exclude
/// `info.yaml` from `recovery_db.tar.gz`, spec §4.7 step 6).
pub fn create_tarball(source_dir: &Path, dest: &Path, skip: impl Fn(&Path) -> bool) -> Result<()> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in walk(source_dir)? {
        let relative = entry
            .strip_prefix(source_dir)
            .map_err(|_| DaemonError::Fatal("tarball entry escaped its source directory".into()))?;
        if skip(relative) {
            continue;
        }
        builder.append_path_with_name(&entry, relative)?;
    }

    builder
        .into_inner()
        .map_err(|e| DaemonError::Fatal(format!("failed to finalize tarball: {e}")))?
        .finish()
        .map_err(|e| DaemonError::Fatal(format!("failed to finish gzip stream: {e}")))?;
    Ok(())
}

/// Extracts a gzip tarball into `dest_dir`, rejecting any entry whose name
/// contains `..` (spec §4.7 Security). Validated in a full first pass over
/// every entry before any file is written, so a `..` entry anywhere in the
/// archive — even after otherwise-valid entries — aborts with no files
/// created (spec §8 boundary property), rather than leaving behind
/// whatever unpacked cleanly before the bad entry was reached.
pub fn extract_tarball(tarball: &Path, dest_dir: &Path) -> Result<()> {
    validate_tarball_entries(tarball)?;

    std::fs::create_dir_all(dest_dir)?;
    let file = File::open(tarball)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let target = dest_dir.join(&path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

fn validate_tarball_entries(tarball: &Path) -> Result<()> {
    let file = File::open(tarball)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?.into_owned();
        if path_traverses(&path) {
            return Err(DaemonError::BadRequest(format!(
                "recovery tarball entry {} attempts path traversal",
                path.display()
            )));
        }
    }
    Ok(())
}

fn path_traverses(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

/// An ISO-8601-basic timestamp (`YYYYMMDDTHHMMSSZ`) suitable for
/// `db_backup.<ts>.tar.gz` filenames.
pub fn iso8601_basic_now(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_directory_through_a_tarball() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"world").unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let tarball = dest_dir.path().join("backup.tar.gz");
        create_tarball(src.path(), &tarball, |_| false).unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        extract_tarball(&tarball, restore_dir.path()).unwrap();

        assert_eq!(std::fs::read(restore_dir.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(restore_dir.path().join("sub/b.txt")).unwrap(), b"world");
    }

    #[test]
    fn skip_predicate_excludes_matching_entries() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("info.yaml"), b"secret").unwrap();
        std::fs::write(src.path().join("db.bin"), b"data").unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let tarball = dest_dir.path().join("backup.tar.gz");
        create_tarball(src.path(), &tarball, |p| p == Path::new("info.yaml")).unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        extract_tarball(&tarball, restore_dir.path()).unwrap();

        assert!(!restore_dir.path().join("info.yaml").exists());
        assert!(restore_dir.path().join("db.bin").exists());
    }

    /// A `..` entry arriving after otherwise-valid entries must still
    /// abort with no files created (spec §8 boundary property) — the
    /// earlier entries must not have been unpacked first.
    #[test]
    fn traversal_entry_after_valid_entries_leaves_no_files() {
        let dest_dir = tempfile::tempdir().unwrap();
        let tarball = dest_dir.path().join("backup.tar.gz");

        let file = File::create(&tarball).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_cksum();
        builder.append_data(&mut header, "a.txt", &b"hello"[..]).unwrap();

        let mut evil_header = tar::Header::new_gnu();
        evil_header.set_size(4);
        evil_header.set_cksum();
        builder.append_data(&mut evil_header, "../evil.txt", &b"evil"[..]).unwrap();

        builder.into_inner().unwrap().finish().unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        let err = extract_tarball(&tarball, restore_dir.path()).unwrap_err();
        assert!(err.to_string().contains("path traversal"));

        assert!(!restore_dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read_dir(restore_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn timestamp_is_iso8601_basic() {
        use chrono::TimeZone;
        let now = chrono::Utc.with_ymd_and_hms(2026, 7, 26, 1, 2, 3).unwrap();
        assert_eq!(iso8601_basic_now(now), "20260726T010203Z");
    }
}
