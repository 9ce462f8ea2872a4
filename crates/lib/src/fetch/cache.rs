//! The verified-source cache.
//!
//! Entries are keyed by (name, version, digest) and live at
//! `<root>/{name}-{version}-{digest[:12]}/`. An entry only exists once its
//! `.bale-source` marker has been written — after verification succeeded —
//! so torn or interrupted fetches are invisible and self-heal on the next
//! run.
//!
//! Concurrent fetches for the same key coalesce through a per-key async
//! lock: the loser of the race waits, then observes the winner's marker and
//! takes the cache hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::util::hash;

/// Marker file name; its presence makes a cache entry visible.
pub const SOURCE_MARKER: &str = ".bale-source";

/// Errors during cache bookkeeping.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to create cache directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to remove cache entry '{path}': {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write cache marker: {0}")]
  WriteMarker(#[source] std::io::Error),
}

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub name: String,
  pub version: String,
  /// Full content digest: the archive sha256, the resolved git commit, or
  /// a local tree digest.
  pub digest: String,
}

impl CacheKey {
  pub fn new(name: &str, version: &str, digest: &str) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
      digest: digest.to_string(),
    }
  }

  /// Directory name for this entry.
  pub fn entry_name(&self) -> String {
    format!("{}-{}-{}", self.name, self.version, hash::short(&self.digest))
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.entry_name())
  }
}

/// Marker file content.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceMarker {
  /// Marker format version.
  pub version: u32,
  pub name: String,
  pub unit_version: String,
  /// The verified full digest.
  pub digest: String,
  pub fetched_at: DateTime<Utc>,
}

/// The on-disk source cache plus its in-flight coalescing state.
#[derive(Debug)]
pub struct SourceCache {
  root: PathBuf,
  inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceCache {
  pub fn new(root: PathBuf) -> Self {
    Self {
      root,
      inflight: Mutex::new(HashMap::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
    self.root.join(key.entry_name())
  }

  /// Acquire the per-key fetch lock.
  ///
  /// At most one fetch per key is in flight; everyone else waits here and
  /// then re-checks [`Self::lookup`].
  pub async fn lock_key(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
    let lock = {
      let mut inflight = self.inflight.lock().await;
      inflight.entry(key.entry_name()).or_default().clone()
    };
    lock.lock_owned().await
  }

  /// Return the entry path if a verified entry exists for this key.
  pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
    let entry = self.entry_path(key);
    let marker = self.read_marker(&entry)?;

    if marker.digest != key.digest {
      // Entry name collisions are digest-prefix based; a full-digest
      // mismatch means this entry is not the content we want.
      debug!(entry = %entry.display(), "cache entry digest mismatch, ignoring");
      return None;
    }

    Some(entry)
  }

  /// Prepare a fresh entry directory, discarding any torn remains.
  pub fn prepare_entry(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
    let entry = self.entry_path(key);

    if entry.exists() {
      debug!(entry = %entry.display(), "removing incomplete cache entry");
      std::fs::remove_dir_all(&entry).map_err(|e| CacheError::Remove {
        path: entry.clone(),
        source: e,
      })?;
    }

    std::fs::create_dir_all(&entry).map_err(|e| CacheError::CreateDir {
      path: entry.clone(),
      source: e,
    })?;

    Ok(entry)
  }

  /// Write the completion marker, making the entry visible.
  pub fn commit(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
    let entry = self.entry_path(key);
    let marker = SourceMarker {
      version: 1,
      name: key.name.clone(),
      unit_version: key.version.clone(),
      digest: key.digest.clone(),
      fetched_at: Utc::now(),
    };

    let content = serde_json::to_string(&marker).expect("marker serializes");
    std::fs::write(entry.join(SOURCE_MARKER), format!("{}\n", content)).map_err(CacheError::WriteMarker)?;

    debug!(entry = %entry.display(), "committed cache entry");
    Ok(entry)
  }

  fn read_marker(&self, entry: &Path) -> Option<SourceMarker> {
    let content = std::fs::read_to_string(entry.join(SOURCE_MARKER)).ok()?;
    match serde_json::from_str(&content) {
      Ok(marker) => Some(marker),
      Err(e) => {
        // Unreadable marker: treat the entry as absent.
        debug!(entry = %entry.display(), error = %e, "invalid cache marker");
        None
      }
    }
  }
}
