//! Running a single unit's build.
//!
//! The verified source tree is copied into a dedicated working directory
//! (the cache entry is never built in, so a failed build cannot corrupt
//! it), then each flavor invocation runs sequentially with the injected
//! environment and fully captured output. A non-zero exit aborts the
//! remaining steps.
//!
//! Completed builds leave a marker recording the build digest (unit
//! definition + source content); a matching marker on a later run skips
//! the process invocations entirely.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::build::flavor::{BuildContext, ProcessSpec};
use crate::cancel::CancelToken;
use crate::env::Environment;
use crate::manifest::Unit;
use crate::util::{fs as fsutil, hash};

/// Marker file name written into a completed build directory.
pub const BUILD_MARKER: &str = ".bale-build";

/// Number of log lines carried in a step-failure error.
const LOG_TAIL_LINES: usize = 20;

/// Errors during build execution.
#[derive(Debug, Error)]
pub enum BuildError {
  /// A build step exited non-zero; remaining steps were not run.
  #[error("build step {step} ({label}) failed for '{unit}' with exit code {code:?}")]
  StepFailed {
    unit: String,
    step: usize,
    label: String,
    code: Option<i32>,
    /// Tail of the captured log, for error reporting.
    log_tail: String,
  },

  #[error("no build steps produced for '{unit}'")]
  Empty { unit: String },

  #[error("build root '{path}' does not exist for '{unit}'")]
  MissingBuildRoot { unit: String, path: PathBuf },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("build cancelled")]
  Cancelled,
}

/// Per-run executor configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Root under which per-unit build directories and logs live.
  pub work_dir: PathBuf,
  /// Install prefix handed to the flavor adapters.
  pub install_dir: PathBuf,
  /// Parallelism hint for build tools (`make -j`, `cmake --parallel`).
  pub jobs: usize,
}

/// Outcome of one unit build.
#[derive(Debug, Clone)]
pub struct BuildRecord {
  pub build_dir: PathBuf,
  pub log_path: PathBuf,
  pub steps_run: usize,
  /// True when a matching completion marker skipped the build.
  pub cached: bool,
}

/// Marker file content.
#[derive(Debug, Serialize, Deserialize)]
struct BuildMarker {
  version: u32,
  digest: String,
}

/// Digest identifying a build: the unit definition plus the source content
/// digest. Either changing invalidates the completion marker.
fn build_digest(unit: &Unit, source_digest: &str) -> String {
  let definition = serde_json::to_string(unit).expect("unit serializes");
  hash::hash_bytes(format!("{}\n{}", definition, source_digest).as_bytes())
}

fn read_marker(build_dir: &Path) -> Option<BuildMarker> {
  let content = std::fs::read_to_string(build_dir.join(BUILD_MARKER)).ok()?;
  serde_json::from_str(&content).ok()
}

fn write_marker(build_dir: &Path, digest: &str) -> Result<(), BuildError> {
  let marker = BuildMarker {
    version: 1,
    digest: digest.to_string(),
  };
  let content = serde_json::to_string(&marker).expect("marker serializes");
  std::fs::write(build_dir.join(BUILD_MARKER), format!("{}\n", content))?;
  Ok(())
}

/// Execute a unit's build steps against a verified source tree.
///
/// # Arguments
///
/// * `unit` - The unit to build
/// * `source_dir` - The verified source tree (read-only; copied, not built in)
/// * `source_digest` - Content digest of the source, for build caching
/// * `env` - The immutable injected environment
/// * `config` - Executor configuration
/// * `cancel` - Cooperative cancellation
pub async fn run_build(
  unit: &Unit,
  source_dir: &Path,
  source_digest: &str,
  env: &Environment,
  config: &BuildConfig,
  cancel: &CancelToken,
) -> Result<BuildRecord, BuildError> {
  let build_dir = config.work_dir.join("build").join(unit.id());
  let log_path = config.work_dir.join("logs").join(format!("{}.log", unit.id()));
  let digest = build_digest(unit, source_digest);

  if let Some(marker) = read_marker(&build_dir) {
    if marker.digest == digest {
      debug!(unit = %unit.name, "build marker matches, skipping build");
      return Ok(BuildRecord {
        build_dir,
        log_path,
        steps_run: 0,
        cached: true,
      });
    }
    debug!(unit = %unit.name, "build inputs changed, rebuilding");
  }

  if build_dir.exists() {
    tokio::fs::remove_dir_all(&build_dir).await?;
  }
  tokio::fs::create_dir_all(&build_dir).await?;
  tokio::fs::create_dir_all(&config.install_dir).await?;
  if let Some(parent) = log_path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }

  // Work on a private copy so a failed build cannot touch the cache entry.
  {
    let src = source_dir.to_path_buf();
    let dst = build_dir.clone();
    tokio::task::spawn_blocking(move || fsutil::copy_dir_all(&src, &dst))
      .await
      .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;
  }

  let step_root = match &unit.relative_path {
    Some(rel) => build_dir.join(rel),
    None => build_dir.clone(),
  };
  if !step_root.is_dir() {
    return Err(BuildError::MissingBuildRoot {
      unit: unit.name.clone(),
      path: step_root,
    });
  }

  let ctx = BuildContext {
    build_dir: &step_root,
    install_dir: &config.install_dir,
    jobs: config.jobs,
  };
  let invocations = unit.build.flavor.invocations(&unit.build, &ctx);
  if invocations.is_empty() {
    return Err(BuildError::Empty { unit: unit.name.clone() });
  }

  info!(unit = %unit.name, steps = invocations.len(), flavor = %unit.build.flavor, "building");

  let mut log = String::new();
  for (idx, invocation) in invocations.iter().enumerate() {
    debug!(unit = %unit.name, step = idx, label = %invocation.label, "running build step");
    log.push_str(&format!("==> {}: {}\n", invocation.label, invocation.display_command()));

    let output = run_step(invocation, &step_root, env, cancel).await;
    let output = match output {
      Ok(output) => output,
      Err(e) => {
        let _ = tokio::fs::write(&log_path, &log).await;
        return Err(e);
      }
    };

    log.push_str(&String::from_utf8_lossy(&output.stdout));
    log.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
      warn!(
        unit = %unit.name,
        step = idx,
        label = %invocation.label,
        code = ?output.status.code(),
        "build step failed"
      );
      tokio::fs::write(&log_path, &log).await?;
      return Err(BuildError::StepFailed {
        unit: unit.name.clone(),
        step: idx,
        label: invocation.label.clone(),
        code: output.status.code(),
        log_tail: tail(&log, LOG_TAIL_LINES),
      });
    }
  }

  tokio::fs::write(&log_path, &log).await?;
  write_marker(&build_dir, &digest)?;

  info!(unit = %unit.name, log = %log_path.display(), "build complete");
  Ok(BuildRecord {
    build_dir,
    log_path,
    steps_run: invocations.len(),
    cached: false,
  })
}

struct StepOutput {
  status: std::process::ExitStatus,
  stdout: Vec<u8>,
  stderr: Vec<u8>,
}

/// Run one invocation with captured output, killing the child on
/// cancellation.
async fn run_step(
  invocation: &ProcessSpec,
  cwd: &Path,
  env: &Environment,
  cancel: &CancelToken,
) -> Result<StepOutput, BuildError> {
  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .current_dir(cwd)
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::piped());
  env.apply(&mut command);

  let mut child = command.spawn()?;

  let mut stdout_pipe = child.stdout.take().expect("stdout piped");
  let mut stderr_pipe = child.stderr.take().expect("stderr piped");
  let stdout_task = tokio::spawn(async move {
    let mut buf = Vec::new();
    let _ = stdout_pipe.read_to_end(&mut buf).await;
    buf
  });
  let stderr_task = tokio::spawn(async move {
    let mut buf = Vec::new();
    let _ = stderr_pipe.read_to_end(&mut buf).await;
    buf
  });

  let status = tokio::select! {
    _ = cancel.cancelled() => {
      let _ = child.start_kill();
      let _ = child.wait().await;
      return Err(BuildError::Cancelled);
    }
    status = child.wait() => status?,
  };

  let stdout = stdout_task.await.unwrap_or_default();
  let stderr = stderr_task.await.unwrap_or_default();

  Ok(StepOutput { status, stdout, stderr })
}

/// The last `lines` lines of a log.
fn tail(log: &str, lines: usize) -> String {
  let all: Vec<&str> = log.lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::build::Flavor;
  use crate::manifest::{BuildSpec, Source};
  use tempfile::tempdir;

  fn shell_unit(name: &str, steps: &[&str]) -> Unit {
    Unit {
      name: name.to_string(),
      version: "1.0".to_string(),
      source: Source::Path {
        path: PathBuf::from("/unused"),
      },
      license: None,
      dependencies: vec![],
      relative_path: None,
      build: BuildSpec {
        flavor: Flavor::Shell,
        configure_args: vec![],
        steps: steps.iter().map(|s| s.to_string()).collect(),
      },
    }
  }

  fn config(work: &Path) -> BuildConfig {
    BuildConfig {
      work_dir: work.join("work"),
      install_dir: work.join("install"),
      jobs: 1,
    }
  }

  fn source_with(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    for (name, content) in files {
      let path = dir.path().join(name);
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
      }
      std::fs::write(path, content).unwrap();
    }
    dir
  }

  #[tokio::test]
  async fn successful_build_runs_all_steps() {
    let source = source_with(&[("hello.txt", "hi")]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["echo first", "echo second"]);

    let record = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &config(work.path()),
      &CancelToken::never(),
    )
    .await
    .unwrap();

    assert_eq!(record.steps_run, 2);
    assert!(!record.cached);
    assert!(record.build_dir.join("hello.txt").exists());
    assert!(record.build_dir.join(BUILD_MARKER).exists());

    let log = std::fs::read_to_string(&record.log_path).unwrap();
    assert!(log.contains("first"));
    assert!(log.contains("second"));
  }

  #[tokio::test]
  async fn failing_step_aborts_remaining_steps() {
    let source = source_with(&[("hello.txt", "hi")]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["echo before", "exit 7", "echo after"]);

    let err = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &config(work.path()),
      &CancelToken::never(),
    )
    .await
    .unwrap_err();

    match err {
      BuildError::StepFailed {
        unit,
        step,
        code,
        log_tail,
        ..
      } => {
        assert_eq!(unit, "pkg");
        assert_eq!(step, 1);
        assert_eq!(code, Some(7));
        assert!(log_tail.contains("before"));
      }
      other => panic!("expected StepFailed, got {other}"),
    }

    // The log was persisted and the third step never ran.
    let log_path = work.path().join("work/logs/pkg-1.0.log");
    let log = std::fs::read_to_string(log_path).unwrap();
    assert!(log.contains("before"));
    assert!(!log.contains("after"));
  }

  #[tokio::test]
  async fn environment_is_injected_verbatim() {
    let source = source_with(&[]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["echo flags=$CFLAGS"]);

    let env = Environment::new().with_var("CFLAGS", "-I/opt/embedded/include -O2");
    let record = run_build(
      &unit,
      source.path(),
      "digest-a",
      &env,
      &config(work.path()),
      &CancelToken::never(),
    )
    .await
    .unwrap();

    let log = std::fs::read_to_string(&record.log_path).unwrap();
    assert!(log.contains("flags=-I/opt/embedded/include -O2"));
  }

  #[tokio::test]
  async fn matching_marker_skips_process_invocations() {
    let source = source_with(&[("a.txt", "a")]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["echo built"]);
    let cfg = config(work.path());

    let first = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &cfg,
      &CancelToken::never(),
    )
    .await
    .unwrap();
    assert!(!first.cached);
    assert_eq!(first.steps_run, 1);

    let second = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &cfg,
      &CancelToken::never(),
    )
    .await
    .unwrap();
    assert!(second.cached);
    assert_eq!(second.steps_run, 0);
  }

  #[tokio::test]
  async fn changed_source_digest_rebuilds() {
    let source = source_with(&[("a.txt", "a")]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["echo built"]);
    let cfg = config(work.path());

    let first = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &cfg,
      &CancelToken::never(),
    )
    .await
    .unwrap();
    assert!(!first.cached);

    let second = run_build(
      &unit,
      source.path(),
      "digest-b",
      &Environment::new(),
      &cfg,
      &CancelToken::never(),
    )
    .await
    .unwrap();
    assert!(!second.cached, "a new source digest must invalidate the marker");
  }

  #[tokio::test]
  async fn source_tree_is_never_modified() {
    let source = source_with(&[("precious.txt", "original")]);
    let work = tempdir().unwrap();
    // The step mutates its working copy.
    let unit = shell_unit("pkg", &["echo clobbered > precious.txt", "exit 1"]);

    let _ = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &config(work.path()),
      &CancelToken::never(),
    )
    .await;

    let content = std::fs::read_to_string(source.path().join("precious.txt")).unwrap();
    assert_eq!(content, "original");
  }

  #[tokio::test]
  async fn relative_path_selects_build_root() {
    let source = source_with(&[("pkg-1.0/inner.txt", "nested")]);
    let work = tempdir().unwrap();
    let mut unit = shell_unit("pkg", &["test -f inner.txt"]);
    unit.relative_path = Some("pkg-1.0".to_string());

    run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &config(work.path()),
      &CancelToken::never(),
    )
    .await
    .unwrap();
  }

  #[tokio::test]
  async fn missing_relative_path_is_reported() {
    let source = source_with(&[("top.txt", "x")]);
    let work = tempdir().unwrap();
    let mut unit = shell_unit("pkg", &["true"]);
    unit.relative_path = Some("no-such-dir".to_string());

    let err = run_build(
      &unit,
      source.path(),
      "digest-a",
      &Environment::new(),
      &config(work.path()),
      &CancelToken::never(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BuildError::MissingBuildRoot { .. }));
  }

  #[tokio::test]
  async fn cancellation_kills_the_running_step() {
    let source = source_with(&[]);
    let work = tempdir().unwrap();
    let unit = shell_unit("pkg", &["sleep 30"]);

    let (canceller, token) = crate::cancel::channel();
    let cfg = config(work.path());

    let handle = {
      let unit = unit.clone();
      let source = source.path().to_path_buf();
      let env = Environment::new();
      tokio::spawn(async move { run_build(&unit, &source, "digest-a", &env, &cfg, &token).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    canceller.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(BuildError::Cancelled)));
  }

  #[test]
  fn tail_keeps_last_lines() {
    let log = (1..=30).map(|i| format!("line {}\n", i)).collect::<String>();
    let tail = tail(&log, 5);
    assert!(tail.starts_with("line 26"));
    assert!(tail.ends_with("line 30"));
  }
}
