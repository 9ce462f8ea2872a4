//! Default filesystem locations.
//!
//! These are conveniences for the CLI layer; the pipeline core itself only
//! ever receives fully resolved paths through [`crate::pipeline::PipelineConfig`].

use std::path::PathBuf;

/// Base cache directory (`~/.cache/bale` or the platform equivalent).
pub fn cache_dir() -> PathBuf {
  dirs::cache_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("bale")
}

/// Where verified source trees are cached.
pub fn source_cache_dir() -> PathBuf {
  cache_dir().join("sources")
}

/// Where builds run and logs are written.
pub fn work_dir() -> PathBuf {
  cache_dir().join("work")
}

/// Default install prefix for built artifacts.
pub fn install_dir() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("bale")
    .join("embedded")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derived_dirs_nest_under_cache() {
    assert!(source_cache_dir().starts_with(cache_dir()));
    assert!(work_dir().starts_with(cache_dir()));
  }
}
