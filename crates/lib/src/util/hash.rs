//! Hashing utilities for source verification and cache keying.
//!
//! All digests are lowercase hexadecimal SHA-256. [`short`] truncates a
//! digest for use in cache entry names.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Length of the digest prefix used in cache entry names.
pub const SHORT_DIGEST_LEN: usize = 12;

/// Error during file or directory hashing.
#[derive(Debug, Error)]
pub enum HashError {
  #[error("failed to read '{path}': {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to walk directory: {0}")]
  WalkDir(String),
}

/// Compute the SHA-256 digest of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Compute the SHA-256 digest of a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
  let file = File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    source: e,
  })?;
  let mut reader = BufReader::new(file);
  let mut hasher = Sha256::new();

  let mut buffer = [0u8; 8192];
  loop {
    let bytes_read = reader.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      source: e,
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Compute a deterministic digest of a directory's contents.
///
/// Includes file contents, directory structure, and symlink targets, but
/// not metadata like timestamps. Entries are visited in sorted order so the
/// digest is stable across runs.
pub fn hash_directory(path: &Path) -> Result<String, HashError> {
  let mut hasher = Sha256::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| HashError::WalkDir(e.to_string()))?;
    let rel_path = entry
      .path()
      .strip_prefix(path)
      .unwrap_or(entry.path())
      .to_string_lossy()
      .to_string();

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry.path())?)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = std::fs::read_link(entry.path()).map_err(|e| HashError::ReadFile {
        path: entry.path().display().to_string(),
        source: e,
      })?;
      format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      // Skip special files (sockets, devices, etc.)
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Truncate a digest to the length used in cache entry names.
pub fn short(digest: &str) -> &str {
  &digest[..SHORT_DIGEST_LEN.min(digest.len())]
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::io::Write;
  use tempfile::{NamedTempFile, tempdir};

  #[test]
  fn hash_bytes_known_value() {
    assert_eq!(
      hash_bytes(b"hello world"),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn hash_file_matches_bytes() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"hello world").unwrap();
    file.flush().unwrap();

    assert_eq!(hash_file(file.path()).unwrap(), hash_bytes(b"hello world"));
  }

  #[test]
  fn hash_directory_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let first = hash_directory(temp.path()).unwrap();
    let second = hash_directory(temp.path()).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn hash_directory_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let before = hash_directory(temp.path()).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let after = hash_directory(temp.path()).unwrap();

    assert_ne!(before, after);
  }

  #[test]
  fn hash_directory_sees_structure() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("file.txt"), "content").unwrap();

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("subdir")).unwrap();
    fs::write(nested.path().join("subdir/file.txt"), "content").unwrap();

    assert_ne!(
      hash_directory(flat.path()).unwrap(),
      hash_directory(nested.path()).unwrap()
    );
  }

  #[test]
  fn short_truncates() {
    let digest = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    assert_eq!(short(digest), "b94d27b9934d");
    assert_eq!(short("abc"), "abc");
  }
}
