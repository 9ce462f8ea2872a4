//! Source fetching and verification.
//!
//! The fetcher turns a unit's source declaration into a verified local
//! source tree:
//!
//! - Remote archives download to a staging file, are hashed during the
//!   transfer, and only enter the cache when the digest matches the
//!   declared checksum. Mismatched content never reaches a builder.
//! - Local paths are canonicalized and used in place.
//! - Git repositories clone (or incrementally fetch) into the cache and
//!   resolve their pinned revision to a commit hash.
//!
//! Network and IO failures retry with bounded exponential backoff;
//! checksum mismatches do not (re-downloading corrupt content three times
//! tells you nothing new).

pub mod archive;
pub mod cache;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::manifest::{Source, Unit};
use crate::util::hash::{self, HashError};

pub use archive::ArchiveError;
pub use cache::{CacheError, CacheKey, SourceCache};

/// Errors during source fetching.
#[derive(Debug, Error)]
pub enum FetchError {
  /// All download attempts failed.
  #[error("fetch failed for {url} after {attempts} attempts: {last_error}")]
  Failed {
    url: String,
    attempts: u32,
    last_error: String,
  },

  #[error("http request failed for {url}: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("http status {status} for {url}")]
  Status { url: String, status: u16 },

  /// Downloaded bytes do not match the declared checksum.
  #[error("checksum mismatch for '{unit}': expected {expected}, got {actual}")]
  IntegrityMismatch {
    unit: String,
    expected: String,
    actual: String,
  },

  #[error("source path does not exist: {0}")]
  PathNotFound(PathBuf),

  #[error("failed to resolve path '{path}': {source}")]
  Canonicalize {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to open repository at '{path}': {source}")]
  GitOpen {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  GitFetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("no remote configured for repository")]
  NoRemote,

  #[error("failed to connect to remote '{url}': {source}")]
  Connect {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("revision '{rev}' not found in repository")]
  RevisionNotFound { rev: String },

  #[error("failed to resolve HEAD: {0}")]
  ResolveHead(String),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("fetch cancelled")]
  Cancelled,
}

/// How a unit's source tree materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Fetched over the network this run.
  Downloaded,
  /// Served from the verified cache; no network access.
  Cached,
  /// A local directory used in place.
  Local,
}

impl std::fmt::Display for Provenance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Provenance::Downloaded => "downloaded",
      Provenance::Cached => "cached",
      Provenance::Local => "local",
    };
    f.write_str(s)
  }
}

/// A verified source tree, ready for the build executor.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
  pub source_dir: PathBuf,
  /// Content digest: archive sha256, resolved git commit, or local tree
  /// digest. Feeds the build cache key.
  pub digest: String,
  pub provenance: Provenance,
}

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      base_delay: Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  /// Delay before retry number `retry` (0-based): base, 2×base, 4×base, …
  fn delay(&self, retry: u32) -> Duration {
    self.base_delay * 2u32.saturating_pow(retry)
  }
}

/// Fetches and verifies unit sources through the cache.
#[derive(Debug)]
pub struct Fetcher {
  client: reqwest::Client,
  cache: SourceCache,
  retry: RetryPolicy,
}

impl Fetcher {
  pub fn new(cache_root: PathBuf) -> Self {
    Self {
      client: reqwest::Client::new(),
      cache: SourceCache::new(cache_root),
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn cache(&self) -> &SourceCache {
    &self.cache
  }

  /// Materialize a verified source tree for the unit.
  pub async fn fetch(&self, unit: &Unit, cancel: &CancelToken) -> Result<FetchOutcome, FetchError> {
    if cancel.is_cancelled() {
      return Err(FetchError::Cancelled);
    }

    match &unit.source {
      Source::Archive { url, sha256 } => self.fetch_archive(unit, url, sha256, cancel).await,
      Source::Path { path } => self.resolve_local(path),
      Source::Git { url, rev } => self.fetch_git(unit, url, rev.as_deref(), cancel).await,
    }
  }

  async fn fetch_archive(
    &self,
    unit: &Unit,
    url: &str,
    sha256: &str,
    cancel: &CancelToken,
  ) -> Result<FetchOutcome, FetchError> {
    let key = CacheKey::new(&unit.name, &unit.version, sha256);

    // At most one in-flight fetch per key; concurrent requests wait here
    // and take the cache hit the winner produced.
    let _guard = self.cache.lock_key(&key).await;

    if let Some(source_dir) = self.cache.lookup(&key) {
      debug!(unit = %unit.name, entry = %source_dir.display(), "source cache hit");
      return Ok(FetchOutcome {
        source_dir,
        digest: sha256.to_string(),
        provenance: Provenance::Cached,
      });
    }

    info!(unit = %unit.name, url, "fetching source archive");
    let staged = self.download_verified(unit, url, sha256, cancel).await?;

    let entry = self.cache.prepare_entry(&key)?;
    let archive_path = staged.path().to_path_buf();
    let unpack_dest = entry.clone();
    tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &unpack_dest))
      .await
      .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;
    drop(staged);

    let source_dir = self.cache.commit(&key)?;
    info!(unit = %unit.name, entry = %source_dir.display(), "source verified and cached");

    Ok(FetchOutcome {
      source_dir,
      digest: sha256.to_string(),
      provenance: Provenance::Downloaded,
    })
  }

  /// Download with retries until the digest of the received bytes matches
  /// the declared checksum.
  ///
  /// A digest mismatch on a completed transfer is not retried: the staged
  /// file is discarded and the fetch fails with `IntegrityMismatch`.
  async fn download_verified(
    &self,
    unit: &Unit,
    url: &str,
    expected: &str,
    cancel: &CancelToken,
  ) -> Result<tempfile::NamedTempFile, FetchError> {
    let mut last_error = String::new();

    for attempt in 0..self.retry.attempts {
      if attempt > 0 {
        let delay = self.retry.delay(attempt - 1);
        debug!(unit = %unit.name, attempt, delay_ms = delay.as_millis() as u64, "retrying download");
        tokio::select! {
          _ = cancel.cancelled() => return Err(FetchError::Cancelled),
          _ = tokio::time::sleep(delay) => {}
        }
      }

      match self.try_download(url, cancel).await {
        Ok((staged, actual)) => {
          if actual != expected {
            // Deterministic corruption signal; the staging file drops here
            // and nothing enters the cache.
            return Err(FetchError::IntegrityMismatch {
              unit: unit.name.clone(),
              expected: expected.to_string(),
              actual,
            });
          }
          debug!(unit = %unit.name, digest = %expected, "checksum verified");
          return Ok(staged);
        }
        Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
        Err(e) => {
          warn!(unit = %unit.name, url, attempt, error = %e, "download attempt failed");
          last_error = e.to_string();
        }
      }
    }

    Err(FetchError::Failed {
      url: url.to_string(),
      attempts: self.retry.attempts,
      last_error,
    })
  }

  /// One download attempt: stream to a staging file, hashing as bytes
  /// arrive.
  async fn try_download(
    &self,
    url: &str,
    cancel: &CancelToken,
  ) -> Result<(tempfile::NamedTempFile, String), FetchError> {
    let staging = self.cache.root().join("staging");
    std::fs::create_dir_all(&staging)?;

    // Keep the original file name as a suffix so unpacking can dispatch on
    // the extension.
    let mut staged = tempfile::Builder::new()
      .prefix("fetch-")
      .suffix(&format!("-{}", url_file_name(url)))
      .tempfile_in(&staging)?;

    let response = tokio::select! {
      _ = cancel.cancelled() => return Err(FetchError::Cancelled),
      r = self.client.get(url).send() => r.map_err(|e| FetchError::Http {
        url: url.to_string(),
        source: e,
      })?,
    };

    if !response.status().is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }

    let mut response = response;
    let mut hasher = Sha256::new();
    loop {
      let chunk = tokio::select! {
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        c = response.chunk() => c.map_err(|e| FetchError::Http {
          url: url.to_string(),
          source: e,
        })?,
      };
      let Some(chunk) = chunk else { break };
      hasher.update(&chunk);
      staged.write_all(&chunk)?;
    }
    staged.flush()?;

    Ok((staged, hex::encode(hasher.finalize())))
  }

  fn resolve_local(&self, path: &Path) -> Result<FetchOutcome, FetchError> {
    let canonical = path.canonicalize().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        FetchError::PathNotFound(path.to_path_buf())
      } else {
        FetchError::Canonicalize {
          path: path.to_path_buf(),
          source: e,
        }
      }
    })?;

    // Local trees change between runs; digest the content so the build
    // cache invalidates on edits.
    let digest = hash::hash_directory(&canonical)?;
    debug!(path = %canonical.display(), "resolved local source");

    Ok(FetchOutcome {
      source_dir: canonical,
      digest,
      provenance: Provenance::Local,
    })
  }

  async fn fetch_git(
    &self,
    unit: &Unit,
    url: &str,
    rev: Option<&str>,
    cancel: &CancelToken,
  ) -> Result<FetchOutcome, FetchError> {
    if cancel.is_cancelled() {
      return Err(FetchError::Cancelled);
    }

    let repos_dir = self.cache.root().join("git");
    let name = unit.name.clone();
    let url = url.to_string();
    let rev = rev.map(str::to_string);

    // gix's network client is blocking; keep it off the async workers.
    let (source_dir, commit, reused) =
      tokio::task::spawn_blocking(move || fetch_git_blocking(&name, &url, rev.as_deref(), &repos_dir))
        .await
        .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;

    Ok(FetchOutcome {
      source_dir,
      digest: commit,
      provenance: if reused { Provenance::Cached } else { Provenance::Downloaded },
    })
  }
}

/// The file-name component of a URL, query string stripped.
fn url_file_name(url: &str) -> &str {
  let path = url.split(['?', '#']).next().unwrap_or(url);
  path.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("source")
}

/// Clone or update a git repository and resolve the target revision.
///
/// Returns `(worktree_path, commit_hash, reused)` where `reused` means the
/// revision resolved without touching the network.
fn fetch_git_blocking(
  name: &str,
  url: &str,
  rev: Option<&str>,
  repos_dir: &Path,
) -> Result<(PathBuf, String, bool), FetchError> {
  let repo_path = repos_dir.join(format!("{}-{}", name, hash::short(&hash::hash_bytes(url.as_bytes()))));
  std::fs::create_dir_all(repos_dir)?;

  if repo_path.join(".git").exists() {
    debug!(name, path = %repo_path.display(), "opening existing repository");
    let repo = gix::open(&repo_path).map_err(|e| FetchError::GitOpen {
      path: repo_path.clone(),
      source: Box::new(e),
    })?;

    // A pinned revision that already resolves locally needs no network.
    if let Some(rev_str) = rev
      && let Ok(commit) = resolve_revision(&repo, Some(rev_str))
    {
      debug!(name, rev = %commit, "revision already present");
      return Ok((repo_path, commit, true));
    }

    fetch_updates(&repo, url)?;
    let commit = resolve_revision(&repo, rev)?;
    return Ok((repo_path, commit, false));
  }

  info!(name, url, path = %repo_path.display(), "cloning repository");
  let repo = clone_repo(url, &repo_path)?;
  let commit = resolve_revision(&repo, rev)?;
  Ok((repo_path, commit, false))
}

fn clone_repo(url: &str, dest: &Path) -> Result<gix::Repository, FetchError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| FetchError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(repo)
}

fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), FetchError> {
  debug!(url, "fetching updates");

  let remote = repo
    .find_default_remote(gix::remote::Direction::Fetch)
    .ok_or(FetchError::NoRemote)?
    .map_err(|e| FetchError::Connect {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let connection = remote
    .connect(gix::remote::Direction::Fetch)
    .map_err(|e| FetchError::Connect {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  connection
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| FetchError::GitFetch {
      url: url.to_string(),
      source: Box::new(e),
    })?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::GitFetch {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(())
}

/// Resolve a revision spec (commit, tag, branch; HEAD when `None`) to a
/// commit hash.
fn resolve_revision(repo: &gix::Repository, rev: Option<&str>) -> Result<String, FetchError> {
  match rev {
    Some(rev_str) => {
      let spec = repo
        .rev_parse(rev_str)
        .map_err(|_| FetchError::RevisionNotFound { rev: rev_str.to_string() })?;

      let object_id = spec.single().ok_or_else(|| FetchError::RevisionNotFound {
        rev: format!("{} (ambiguous)", rev_str),
      })?;

      let commit = object_id.object().map_err(|e| FetchError::RevisionNotFound {
        rev: format!("{}: {}", rev_str, e),
      })?;

      Ok(commit.id.to_string())
    }
    None => {
      let mut head = repo.head().map_err(|e| FetchError::ResolveHead(e.to_string()))?;
      let commit = head
        .peel_to_commit()
        .map_err(|e| FetchError::ResolveHead(e.to_string()))?;
      Ok(commit.id.to_string())
    }
  }
}
