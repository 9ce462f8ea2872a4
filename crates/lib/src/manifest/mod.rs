//! Loading unit manifests from disk.
//!
//! Each unit is one TOML file; a manifest set is a directory of them. The
//! pipeline core only ever sees the validated [`ManifestSet`], never raw
//! text.

pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

pub use types::{BuildSpec, ManifestError, RawSource, RawUnit, Source, Unit};

/// A validated collection of units, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
  units: BTreeMap<String, Unit>,
}

impl ManifestSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a unit. Returns `false` (and leaves the set unchanged) when a
  /// unit with the same name is already present.
  pub fn insert(&mut self, unit: Unit) -> bool {
    if self.units.contains_key(&unit.name) {
      return false;
    }
    self.units.insert(unit.name.clone(), unit);
    true
  }

  pub fn get(&self, name: &str) -> Option<&Unit> {
    self.units.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.units.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.units.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Unit> {
    self.units.values()
  }

  /// Restrict the set to the given names (used to build a single unit and
  /// its dependency closure).
  pub fn subset(&self, names: &std::collections::BTreeSet<String>) -> ManifestSet {
    ManifestSet {
      units: self
        .units
        .iter()
        .filter(|(name, _)| names.contains(*name))
        .map(|(name, unit)| (name.clone(), unit.clone()))
        .collect(),
    }
  }
}

/// Load a single unit manifest file.
pub fn load_file(path: &Path) -> Result<Unit, ManifestError> {
  let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
    path: path.to_path_buf(),
    source: e,
  })?;

  let raw: RawUnit = toml::from_str(&text).map_err(|e| ManifestError::Parse {
    path: path.to_path_buf(),
    source: Box::new(e),
  })?;

  let unit = raw.validate()?;
  debug!(unit = %unit.name, path = %path.display(), "loaded unit manifest");
  Ok(unit)
}

/// Load every `*.toml` file in a directory into a [`ManifestSet`].
///
/// Files are visited in sorted order so duplicate-name errors are
/// deterministic.
pub fn load_dir(dir: &Path) -> Result<ManifestSet, ManifestError> {
  let mut paths: Vec<_> = std::fs::read_dir(dir)
    .map_err(|e| ManifestError::Io {
      path: dir.to_path_buf(),
      source: e,
    })?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
    .collect();
  paths.sort();

  let mut set = ManifestSet::new();
  for path in paths {
    let unit = load_file(&path)?;
    let name = unit.name.clone();
    if !set.insert(unit) {
      return Err(ManifestError::DuplicateUnit { name, path });
    }
  }

  debug!(count = set.len(), dir = %dir.display(), "loaded manifest set");
  Ok(set)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  const SHA: &str = "4ba9a090a42cf1e12b84c64e4464bb6fb893666841d5843cc5bef90774028882";

  fn write_unit(dir: &Path, file: &str, name: &str, deps: &[&str]) {
    let deps = deps
      .iter()
      .map(|d| format!("\"{}\"", d))
      .collect::<Vec<_>>()
      .join(", ");
    fs::write(
      dir.join(file),
      format!(
        r#"
name = "{name}"
version = "1.0"
dependencies = [{deps}]

[source]
url = "https://example.com/{name}.tar.gz"
sha256 = "{SHA}"

[build]
flavor = "cmake"
"#
      ),
    )
    .unwrap();
  }

  #[test]
  fn load_file_parses_full_unit() {
    let dir = tempdir().unwrap();
    fs::write(
      dir.path().join("json-c.toml"),
      format!(
        r#"
name = "json-c"
version = "0.15-20200726"
license = "MIT"
dependencies = ["cmake"]
relative_path = "json-c-json-c-0.15-20200726"

[source]
url = "https://example.com/json-c.tar.gz"
sha256 = "{SHA}"

[build]
flavor = "cmake"
configure_args = ["-DBUILD_STATIC_LIBS=ON"]
"#
      ),
    )
    .unwrap();

    let unit = load_file(&dir.path().join("json-c.toml")).unwrap();
    assert_eq!(unit.name, "json-c");
    assert_eq!(unit.version, "0.15-20200726");
    assert_eq!(unit.license.as_deref(), Some("MIT"));
    assert_eq!(unit.dependencies, vec!["cmake".to_string()]);
    assert_eq!(unit.relative_path.as_deref(), Some("json-c-json-c-0.15-20200726"));
    assert_eq!(unit.build.configure_args, vec!["-DBUILD_STATIC_LIBS=ON".to_string()]);
  }

  #[test]
  fn load_file_reports_parse_error_with_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "name = [not valid").unwrap();

    let err = load_file(&path).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"));
  }

  #[test]
  fn load_file_missing_file() {
    let err = load_file(Path::new("/nonexistent/unit.toml")).unwrap_err();
    assert!(matches!(err, ManifestError::Io { .. }));
  }

  #[test]
  fn load_dir_collects_all_units() {
    let dir = tempdir().unwrap();
    write_unit(dir.path(), "a.toml", "a", &[]);
    write_unit(dir.path(), "b.toml", "b", &["a"]);
    // Non-TOML files are ignored.
    fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

    let set = load_dir(dir.path()).unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains("a"));
    assert_eq!(set.get("b").unwrap().dependencies, vec!["a".to_string()]);
  }

  #[test]
  fn load_dir_rejects_duplicate_names() {
    let dir = tempdir().unwrap();
    write_unit(dir.path(), "one.toml", "same", &[]);
    write_unit(dir.path(), "two.toml", "same", &[]);

    let err = load_dir(dir.path()).unwrap_err();
    match err {
      ManifestError::DuplicateUnit { name, path } => {
        assert_eq!(name, "same");
        assert!(path.ends_with("two.toml"));
      }
      other => panic!("expected DuplicateUnit, got {other:?}"),
    }
  }

  #[test]
  fn subset_filters_by_name() {
    let dir = tempdir().unwrap();
    write_unit(dir.path(), "a.toml", "a", &[]);
    write_unit(dir.path(), "b.toml", "b", &[]);
    write_unit(dir.path(), "c.toml", "c", &[]);

    let set = load_dir(dir.path()).unwrap();
    let names = ["a".to_string(), "c".to_string()].into_iter().collect();
    let subset = set.subset(&names);

    assert_eq!(subset.len(), 2);
    assert!(subset.contains("a"));
    assert!(!subset.contains("b"));
  }
}
