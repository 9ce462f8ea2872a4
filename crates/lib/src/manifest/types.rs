//! Unit manifest types.
//!
//! A unit manifest is one TOML file describing one buildable dependency.
//! Raw TOML deserializes into [`RawUnit`], which [`RawUnit::validate`]s
//! into a [`Unit`] so that every missing or malformed field gets a precise
//! error instead of a generic deserialization failure.
//!
//! ```toml
//! name = "json-c"
//! version = "0.15-20200726"
//! license = "MIT"
//! dependencies = ["cmake"]
//! relative_path = "json-c-json-c-0.15-20200726"
//!
//! [source]
//! url = "https://example.com/json-c-0.15.tar.gz"
//! sha256 = "4ba9a090a42cf1e12b84c64e4464bb6fb893666841d5843cc5bef90774028882"
//!
//! [build]
//! flavor = "cmake"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::Flavor;

/// Errors constructing a [`Unit`] from its declarative description.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("unit '{unit}' is missing required field '{field}'")]
  MissingField { unit: String, field: &'static str },

  #[error("unit '{unit}' has an invalid name: {reason}")]
  InvalidName { unit: String, reason: String },

  #[error("unit '{unit}' declares no source (expected one of url, path, git)")]
  MissingSource { unit: String },

  #[error("unit '{unit}' declares more than one source kind")]
  AmbiguousSource { unit: String },

  #[error("unit '{unit}' has a remote archive source but no sha256 checksum")]
  MissingChecksum { unit: String },

  #[error("unit '{unit}' has an invalid sha256 checksum: {reason}")]
  InvalidChecksum { unit: String, reason: String },

  #[error("unit '{unit}' sets 'rev' but its source is not git")]
  RevWithoutGit { unit: String },

  #[error("unit '{unit}' uses the shell flavor but declares no steps")]
  MissingSteps { unit: String },

  #[error("unit '{unit}' declares steps but its flavor is '{flavor}', not shell")]
  StepsNotAllowed { unit: String, flavor: Flavor },

  #[error("unit '{unit}' depends on itself")]
  SelfDependency { unit: String },

  #[error("duplicate unit '{name}' (second definition in {path})")]
  DuplicateUnit { name: String, path: PathBuf },

  #[error("failed to read manifest {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },
}

/// Where a unit's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
  /// A remote archive, verified against a sha256 checksum before use.
  Archive { url: String, sha256: String },
  /// A local directory, used as-is.
  Path { path: PathBuf },
  /// A git repository at an optional revision (HEAD when absent).
  Git { url: String, rev: Option<String> },
}

impl Source {
  pub fn kind(&self) -> &'static str {
    match self {
      Source::Archive { .. } => "archive",
      Source::Path { .. } => "path",
      Source::Git { .. } => "git",
    }
  }
}

/// How a unit is built: a flavor plus its inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
  #[serde(default)]
  pub flavor: Flavor,

  /// Extra arguments for the flavor's configure step.
  #[serde(default)]
  pub configure_args: Vec<String>,

  /// Explicit shell steps; required by (and only valid for) [`Flavor::Shell`].
  #[serde(default)]
  pub steps: Vec<String>,
}

/// One validated buildable dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unit {
  pub name: String,
  pub version: String,
  pub source: Source,
  /// Inert metadata; carried into the run report, never consulted by the
  /// pipeline.
  pub license: Option<String>,
  pub dependencies: Vec<String>,
  /// Subdirectory of the unpacked source tree that is the build root.
  pub relative_path: Option<String>,
  pub build: BuildSpec,
}

impl Unit {
  /// `name-version`, the display identity used in logs and directory names.
  pub fn id(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

/// The raw deserialization target for a unit manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUnit {
  pub name: Option<String>,
  pub version: Option<String>,
  pub license: Option<String>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  pub relative_path: Option<String>,
  pub source: Option<RawSource>,
  #[serde(default)]
  pub build: BuildSpec,
}

/// The raw `[source]` table: all fields optional, exactly one kind allowed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSource {
  pub url: Option<String>,
  pub sha256: Option<String>,
  pub path: Option<PathBuf>,
  pub git: Option<String>,
  pub rev: Option<String>,
}

impl RawUnit {
  /// Validate the raw declaration into a [`Unit`].
  ///
  /// Pure data construction: no filesystem or network access.
  pub fn validate(self) -> Result<Unit, ManifestError> {
    let name = self
      .name
      .filter(|n| !n.is_empty())
      .ok_or_else(|| ManifestError::MissingField {
        unit: "<unnamed>".to_string(),
        field: "name",
      })?;

    if !name
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._+-".contains(c))
    {
      return Err(ManifestError::InvalidName {
        unit: name.clone(),
        reason: "allowed characters are a-z, 0-9, '.', '_', '+', '-'".to_string(),
      });
    }

    let version = self
      .version
      .filter(|v| !v.is_empty())
      .ok_or_else(|| ManifestError::MissingField {
        unit: name.clone(),
        field: "version",
      })?;

    let raw_source = self
      .source
      .ok_or_else(|| ManifestError::MissingSource { unit: name.clone() })?;
    let source = validate_source(&name, raw_source)?;

    if self.dependencies.iter().any(|dep| dep == &name) {
      return Err(ManifestError::SelfDependency { unit: name });
    }

    let build = self.build;
    if build.flavor.requires_steps() && build.steps.is_empty() {
      return Err(ManifestError::MissingSteps { unit: name });
    }
    if !build.flavor.requires_steps() && !build.steps.is_empty() {
      return Err(ManifestError::StepsNotAllowed {
        unit: name,
        flavor: build.flavor,
      });
    }

    Ok(Unit {
      name,
      version,
      source,
      license: self.license,
      dependencies: self.dependencies,
      relative_path: self.relative_path,
      build,
    })
  }
}

fn validate_source(unit: &str, raw: RawSource) -> Result<Source, ManifestError> {
  let kinds = usize::from(raw.url.is_some()) + usize::from(raw.path.is_some()) + usize::from(raw.git.is_some());

  if kinds == 0 {
    return Err(ManifestError::MissingSource { unit: unit.to_string() });
  }
  if kinds > 1 {
    return Err(ManifestError::AmbiguousSource { unit: unit.to_string() });
  }

  if let Some(url) = raw.url {
    let sha256 = raw
      .sha256
      .ok_or_else(|| ManifestError::MissingChecksum { unit: unit.to_string() })?;
    validate_sha256(unit, &sha256)?;
    if raw.rev.is_some() {
      return Err(ManifestError::RevWithoutGit { unit: unit.to_string() });
    }
    return Ok(Source::Archive { url, sha256 });
  }

  if let Some(path) = raw.path {
    if raw.rev.is_some() {
      return Err(ManifestError::RevWithoutGit { unit: unit.to_string() });
    }
    return Ok(Source::Path { path });
  }

  let url = raw.git.expect("one source kind must be set");
  Ok(Source::Git { url, rev: raw.rev })
}

fn validate_sha256(unit: &str, sha256: &str) -> Result<(), ManifestError> {
  if sha256.len() != 64 {
    return Err(ManifestError::InvalidChecksum {
      unit: unit.to_string(),
      reason: format!("expected 64 hex characters, got {}", sha256.len()),
    });
  }
  if !sha256.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
    return Err(ManifestError::InvalidChecksum {
      unit: unit.to_string(),
      reason: "expected lowercase hexadecimal".to_string(),
    });
  }
  Ok(())
}
