//! The injected build environment.
//!
//! An [`Environment`] is an immutable snapshot: a variable map plus an
//! ordered list of PATH prefixes. It is constructed once per pipeline run
//! (by the CLI/config layer) and shared read-only across every build step.
//! Nothing in the pipeline core reads ambient process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Base PATH used when resolving the final PATH value. Build tools
/// (compilers, make, cmake) come from the host toolchain.
#[cfg(unix)]
const BASE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
#[cfg(windows)]
const BASE_PATH: &str = "";

#[cfg(unix)]
const PATH_SEPARATOR: char = ':';
#[cfg(windows)]
const PATH_SEPARATOR: char = ';';

/// An immutable environment snapshot passed into every build step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
  vars: BTreeMap<String, String>,
  path_prefixes: Vec<PathBuf>,
}

impl Environment {
  pub fn new() -> Self {
    Self::default()
  }

  /// The standard bundling environment for an embedded install prefix:
  /// compiler and linker flags pointing at `<install>/include` and
  /// `<install>/lib`, pkg-config and CMake search paths, and
  /// `<install>/bin` prepended to PATH so units can invoke the tools their
  /// dependencies installed.
  pub fn standard(install_dir: &Path) -> Self {
    let prefix = install_dir.display();
    let include_flags = format!("-I{}/include", prefix);

    let mut vars = BTreeMap::new();
    vars.insert("CFLAGS".to_string(), format!("{} -O2", include_flags));
    vars.insert("CXXFLAGS".to_string(), format!("{} -O2", include_flags));
    vars.insert("CPPFLAGS".to_string(), include_flags);
    vars.insert("LDFLAGS".to_string(), format!("-L{}/lib", prefix));
    vars.insert("LD_RUN_PATH".to_string(), format!("{}/lib", prefix));
    vars.insert("PKG_CONFIG_PATH".to_string(), format!("{}/lib/pkgconfig", prefix));
    vars.insert("CMAKE_PREFIX_PATH".to_string(), prefix.to_string());
    // A minimal, reproducible locale.
    vars.insert("LANG".to_string(), "C".to_string());
    vars.insert("LC_ALL".to_string(), "C".to_string());

    Self {
      vars,
      path_prefixes: vec![install_dir.join("bin")],
    }
  }

  /// Builder-style variable insertion; later values win.
  pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.vars.insert(name.into(), value.into());
    self
  }

  /// Builder-style PATH prefix; earlier prefixes take precedence.
  pub fn with_path_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
    self.path_prefixes.push(prefix.into());
    self
  }

  pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
    self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.vars.get(name).map(String::as_str)
  }

  pub fn path_prefixes(&self) -> &[PathBuf] {
    &self.path_prefixes
  }

  /// The final PATH value: prefixes in declaration order, then the base
  /// system path.
  pub fn resolved_path(&self) -> String {
    let mut parts: Vec<String> = self
      .path_prefixes
      .iter()
      .map(|p| p.display().to_string())
      .collect();
    if !BASE_PATH.is_empty() {
      parts.push(BASE_PATH.to_string());
    }
    parts.join(&PATH_SEPARATOR.to_string())
  }

  /// Apply the snapshot to a command: clear the inherited environment, set
  /// every variable, and set the resolved PATH.
  pub fn apply(&self, command: &mut Command) {
    command.env_clear();
    for (name, value) in &self.vars {
      command.env(name, value);
    }
    command.env("PATH", self.resolved_path());
  }
}
