//! Archive unpacking.
//!
//! Supported formats, dispatched by file name:
//! - `.tar.gz` / `.tgz`
//! - `.tar`
//! - `.zip`
//!
//! Archives unpack with their internal layout intact; a unit whose tree
//! lives under a leading directory (the common GitHub-archive shape) names
//! it via `relative_path`.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::debug;

/// Errors during archive unpacking.
#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("unsupported archive format: {0}")]
  UnsupportedFormat(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to read zip archive: {0}")]
  Zip(String),
}

/// Unpack an archive into the destination directory.
pub fn unpack(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let file_name = archive_path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or_default();

  fs::create_dir_all(dest)?;

  if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
    unpack_tar_gz(archive_path, dest)?;
  } else if file_name.ends_with(".tar") {
    unpack_tar(archive_path, dest)?;
  } else if file_name.ends_with(".zip") {
    unpack_zip(archive_path, dest)?;
  } else {
    return Err(ArchiveError::UnsupportedFormat(file_name.to_string()));
  }

  debug!(archive = %archive_path.display(), dest = %dest.display(), "unpacked archive");
  Ok(())
}

/// Whether a URL or file name looks like an archive we can unpack.
pub fn is_supported(name: &str) -> bool {
  name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".tar") || name.ends_with(".zip")
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let file = File::open(archive_path)?;
  let decoder = GzDecoder::new(BufReader::new(file));
  let mut archive = Archive::new(decoder);
  // tar's unpack rejects entries that would escape the destination.
  archive.unpack(dest)?;
  Ok(())
}

fn unpack_tar(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let file = File::open(archive_path)?;
  let mut archive = Archive::new(BufReader::new(file));
  archive.unpack(dest)?;
  Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let file = File::open(archive_path)?;
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::Zip(e.to_string()))?;
  archive.extract(dest).map_err(|e| ArchiveError::Zip(e.to_string()))?;
  Ok(())
}
