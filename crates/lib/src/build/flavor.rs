//! Build-system flavors.
//!
//! A flavor translates the generic configure/compile/install intent into
//! the concrete invocation sequence for one build tool. The set is closed:
//! adding a tool means adding a variant here, not implementing a trait
//! somewhere else.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::manifest::BuildSpec;

/// The build-system flavor declared by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
  /// CMake: `cmake -S/-B`, `cmake --build`, `cmake --install`.
  Cmake,
  /// Bare Makefile: `make`, `make install`.
  Make,
  /// Autotools: `sh ./configure`, `make`, `make install`.
  Autotools,
  /// Explicit shell steps, each run through the shell.
  Shell,
}

impl Flavor {
  pub fn as_str(&self) -> &'static str {
    match self {
      Flavor::Cmake => "cmake",
      Flavor::Make => "make",
      Flavor::Autotools => "autotools",
      Flavor::Shell => "shell",
    }
  }

  /// Whether this flavor requires explicit `steps` in the build spec.
  pub fn requires_steps(&self) -> bool {
    matches!(self, Flavor::Shell)
  }
}

impl std::fmt::Display for Flavor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Default for Flavor {
  fn default() -> Self {
    Flavor::Make
  }
}

/// One process invocation produced by a flavor adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
  pub program: String,
  pub args: Vec<String>,
  /// Human label for logs and step-failure reporting ("configure",
  /// "compile", "install", "step 2").
  pub label: String,
}

impl ProcessSpec {
  fn new(label: &str, program: &str, args: Vec<String>) -> Self {
    Self {
      program: program.to_string(),
      args,
      label: label.to_string(),
    }
  }

  /// Run a script string through the platform shell.
  fn shell(label: &str, script: &str) -> Self {
    let (program, mut args) = shell_command();
    args.push(script.to_string());
    Self {
      program: program.to_string(),
      args,
      label: label.to_string(),
    }
  }

  /// The full command line, for display.
  pub fn display_command(&self) -> String {
    let mut parts = vec![self.program.clone()];
    parts.extend(self.args.iter().cloned());
    parts.join(" ")
  }
}

#[cfg(unix)]
fn shell_command() -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string()])
}

#[cfg(windows)]
fn shell_command() -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string()])
}

/// Per-build inputs the adapters need to shape their invocations.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
  /// Where the build steps run (the unit's working copy).
  pub build_dir: &'a Path,
  /// The install prefix artifacts land under.
  pub install_dir: &'a Path,
  /// Parallelism hint for the build tool itself.
  pub jobs: usize,
}

impl Flavor {
  /// Produce the ordered process invocations for a build.
  ///
  /// This is the single capability every flavor implements: given a source
  /// tree and an environment-bearing context, emit the concrete sequence of
  /// process invocations that realizes configure/compile/install.
  pub fn invocations(&self, spec: &BuildSpec, ctx: &BuildContext<'_>) -> Vec<ProcessSpec> {
    let prefix = ctx.install_dir.display().to_string();
    let jobs = ctx.jobs.max(1).to_string();

    match self {
      Flavor::Cmake => {
        let mut configure = vec![
          "-S".to_string(),
          ".".to_string(),
          "-B".to_string(),
          "build".to_string(),
          format!("-DCMAKE_INSTALL_PREFIX={}", prefix),
          "-DCMAKE_BUILD_TYPE=Release".to_string(),
        ];
        configure.extend(spec.configure_args.iter().cloned());

        vec![
          ProcessSpec::new("configure", "cmake", configure),
          ProcessSpec::new(
            "compile",
            "cmake",
            vec![
              "--build".to_string(),
              "build".to_string(),
              "--parallel".to_string(),
              jobs,
            ],
          ),
          ProcessSpec::new("install", "cmake", vec!["--install".to_string(), "build".to_string()]),
        ]
      }

      Flavor::Make => {
        let mut compile = vec![format!("-j{}", jobs)];
        compile.extend(spec.configure_args.iter().cloned());

        vec![
          ProcessSpec::new("compile", "make", compile),
          ProcessSpec::new(
            "install",
            "make",
            vec!["install".to_string(), format!("PREFIX={}", prefix)],
          ),
        ]
      }

      Flavor::Autotools => {
        let mut configure = format!("./configure --prefix={}", shell_quote(&prefix));
        for arg in &spec.configure_args {
          configure.push(' ');
          configure.push_str(&shell_quote(arg));
        }

        vec![
          ProcessSpec::shell("configure", &configure),
          ProcessSpec::new("compile", "make", vec![format!("-j{}", jobs)]),
          ProcessSpec::new("install", "make", vec!["install".to_string()]),
        ]
      }

      Flavor::Shell => spec
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| ProcessSpec::shell(&format!("step {}", idx + 1), step))
        .collect(),
    }
  }
}

/// Quote a string for safe interpolation into a shell word.
fn shell_quote(s: &str) -> String {
  if s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=+".contains(c)) {
    s.to_string()
  } else {
    format!("'{}'", s.replace('\'', r"'\''"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn ctx<'a>(build_dir: &'a PathBuf, install_dir: &'a PathBuf) -> BuildContext<'a> {
    BuildContext {
      build_dir,
      install_dir,
      jobs: 4,
    }
  }

  fn spec(flavor: Flavor) -> BuildSpec {
    BuildSpec {
      flavor,
      configure_args: vec![],
      steps: vec![],
    }
  }

  #[test]
  fn cmake_sequence() {
    let build = PathBuf::from("/work/json-c");
    let install = PathBuf::from("/opt/embedded");
    let invocations = Flavor::Cmake.invocations(&spec(Flavor::Cmake), &ctx(&build, &install));

    assert_eq!(invocations.len(), 3);
    assert_eq!(invocations[0].label, "configure");
    assert_eq!(invocations[0].program, "cmake");
    assert!(
      invocations[0]
        .args
        .contains(&"-DCMAKE_INSTALL_PREFIX=/opt/embedded".to_string())
    );
    assert_eq!(invocations[1].label, "compile");
    assert_eq!(invocations[2].label, "install");
  }

  #[test]
  fn cmake_configure_args_appended() {
    let build = PathBuf::from("/work/zlib");
    let install = PathBuf::from("/opt/embedded");
    let mut s = spec(Flavor::Cmake);
    s.configure_args = vec!["-DBUILD_SHARED_LIBS=ON".to_string()];

    let invocations = Flavor::Cmake.invocations(&s, &ctx(&build, &install));
    assert_eq!(invocations[0].args.last().unwrap(), "-DBUILD_SHARED_LIBS=ON");
  }

  #[test]
  fn make_sequence_has_no_configure() {
    let build = PathBuf::from("/work/lib");
    let install = PathBuf::from("/opt/embedded");
    let invocations = Flavor::Make.invocations(&spec(Flavor::Make), &ctx(&build, &install));

    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].label, "compile");
    assert!(invocations[0].args.contains(&"-j4".to_string()));
    assert!(invocations[1].args.contains(&"PREFIX=/opt/embedded".to_string()));
  }

  #[test]
  fn autotools_configures_through_shell() {
    let build = PathBuf::from("/work/lib");
    let install = PathBuf::from("/opt/embedded");
    let mut s = spec(Flavor::Autotools);
    s.configure_args = vec!["--disable-static".to_string()];

    let invocations = Flavor::Autotools.invocations(&s, &ctx(&build, &install));
    assert_eq!(invocations.len(), 3);
    let script = invocations[0].args.last().unwrap();
    assert!(script.contains("./configure --prefix=/opt/embedded"));
    assert!(script.contains("--disable-static"));
  }

  #[test]
  fn shell_runs_each_step() {
    let build = PathBuf::from("/work/lib");
    let install = PathBuf::from("/opt/embedded");
    let mut s = spec(Flavor::Shell);
    s.steps = vec!["echo one".to_string(), "echo two".to_string()];

    let invocations = Flavor::Shell.invocations(&s, &ctx(&build, &install));
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].label, "step 1");
    assert_eq!(invocations[0].args.last().unwrap(), "echo one");
    assert_eq!(invocations[1].label, "step 2");
  }

  #[test]
  fn shell_without_steps_is_empty() {
    let build = PathBuf::from("/work/lib");
    let install = PathBuf::from("/opt/embedded");
    let invocations = Flavor::Shell.invocations(&spec(Flavor::Shell), &ctx(&build, &install));
    assert!(invocations.is_empty());
  }

  #[test]
  fn quoting_only_when_needed() {
    assert_eq!(shell_quote("--prefix=/opt/embedded"), "--prefix=/opt/embedded");
    assert_eq!(shell_quote("a b"), "'a b'");
  }

  #[test]
  fn flavor_round_trips_through_serde() {
    let json = serde_json::to_string(&Flavor::Autotools).unwrap();
    assert_eq!(json, "\"autotools\"");
    let back: Flavor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Flavor::Autotools);
  }
}
