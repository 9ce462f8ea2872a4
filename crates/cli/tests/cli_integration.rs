//! End-to-end tests for the `bale` binary.
//!
//! Every scenario runs against local path sources and explicit cache/work
//! directories, so no network access is involved.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Workspace {
  root: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("manifests")).unwrap();
    fs::create_dir_all(root.path().join("source")).unwrap();
    fs::write(root.path().join("source/src.c"), "int main() {}").unwrap();
    Self { root }
  }

  fn manifest_dir(&self) -> PathBuf {
    self.root.path().join("manifests")
  }

  fn source_dir(&self) -> PathBuf {
    self.root.path().join("source")
  }

  /// Write a shell-flavor unit building from the shared local source.
  fn write_unit(&self, name: &str, deps: &[&str], steps: &[&str]) {
    let deps = deps.iter().map(|d| format!("\"{d}\"")).collect::<Vec<_>>().join(", ");
    let steps = steps.iter().map(|s| format!("\"{s}\"")).collect::<Vec<_>>().join(", ");
    let manifest = format!(
      r#"
name = "{name}"
version = "1.0"
dependencies = [{deps}]

[source]
path = "{source}"

[build]
flavor = "shell"
steps = [{steps}]
"#,
      source = self.source_dir().display(),
    );
    fs::write(self.manifest_dir().join(format!("{name}.toml")), manifest).unwrap();
  }

  fn write_raw(&self, file: &str, content: &str) {
    fs::write(self.manifest_dir().join(file), content).unwrap();
  }

  fn bale(&self, subcommand: &str) -> Command {
    let mut cmd = Command::cargo_bin("bale").unwrap();
    cmd.arg(subcommand);
    cmd
  }

  /// A `bale <subcommand>` invocation with the pipeline directories pinned
  /// inside the workspace.
  fn bale_pipeline(&self, subcommand: &str, extra: &[&str]) -> Command {
    let mut cmd = self.bale(subcommand);
    for arg in extra {
      cmd.arg(arg);
    }
    cmd
      .arg(self.manifest_dir())
      .arg("--cache-dir")
      .arg(self.root.path().join("cache"))
      .arg("--work-dir")
      .arg(self.root.path().join("work"))
      .arg("--install-dir")
      .arg(self.root.path().join("install"));
    cmd
  }
}

#[test]
fn plan_prints_dependency_order() {
  let ws = Workspace::new();
  ws.write_unit("zlib", &[], &["echo z"]);
  ws.write_unit("app", &["zlib"], &["echo app"]);

  ws.bale("plan")
    .arg(ws.manifest_dir())
    .assert()
    .success()
    .stdout(
      predicate::str::contains("1. zlib-1.0")
        .and(predicate::str::contains("2. app-1.0"))
        .and(predicate::str::contains("after zlib")),
    );
}

#[test]
fn plan_rejects_cycles_with_exit_2() {
  let ws = Workspace::new();
  ws.write_unit("a", &["b"], &["echo a"]);
  ws.write_unit("b", &["a"], &["echo b"]);

  ws.bale("plan")
    .arg(ws.manifest_dir())
    .assert()
    .code(2)
    .stderr(predicate::str::contains("cycle"));
}

#[test]
fn plan_rejects_unresolved_dependency() {
  let ws = Workspace::new();
  ws.write_unit("app", &["missing-lib"], &["echo app"]);

  ws.bale("plan")
    .arg(ws.manifest_dir())
    .assert()
    .code(2)
    .stderr(predicate::str::contains("missing-lib"));
}

#[test]
fn malformed_manifest_is_a_resolution_failure() {
  let ws = Workspace::new();
  ws.write_raw(
    "broken.toml",
    r#"
name = "broken"
version = "1.0"

[source]
url = "https://example.com/broken.tar.gz"

[build]
flavor = "make"
"#,
  );

  ws.bale_pipeline("run", &[])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("checksum"));
}

#[test]
fn run_builds_all_units() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["echo building a"]);
  ws.write_unit("b", &["a"], &["echo building b"]);

  ws.bale_pipeline("run", &[])
    .assert()
    .success()
    .stdout(predicate::str::contains("2 succeeded, 0 failed, 0 skipped"));
}

#[test]
fn run_writes_a_json_report() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["echo ok"]);
  let report_path = ws.root.path().join("report.json");

  ws.bale_pipeline("run", &["--report", report_path.to_str().unwrap()])
    .assert()
    .success();

  let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
  assert_eq!(report["units"]["a"]["status"]["state"], "succeeded");
  assert_eq!(report["units"]["a"]["provenance"], "local");
}

#[test]
fn build_failure_exits_4_with_log_tail() {
  let ws = Workspace::new();
  ws.write_unit("bad", &[], &["echo diagnostic output", "exit 1"]);

  ws.bale_pipeline("run", &[])
    .assert()
    .code(4)
    .stdout(predicate::str::contains("diagnostic output"));
}

#[test]
fn fetch_failure_exits_3() {
  let ws = Workspace::new();
  ws.write_raw(
    "ghost.toml",
    r#"
name = "ghost"
version = "1.0"

[source]
path = "/nonexistent/source/tree"

[build]
flavor = "shell"
steps = ["echo never"]
"#,
  );

  ws.bale_pipeline("run", &[]).assert().code(3);
}

#[test]
fn keep_going_continues_independent_branches() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["exit 1"]);
  ws.write_unit("b", &[], &["echo b ok"]);
  ws.write_unit("c", &["a", "b"], &["echo c"]);

  ws.bale_pipeline("run", &["--keep-going"])
    .assert()
    .code(4)
    .stdout(
      predicate::str::contains("1 succeeded, 1 failed, 1 skipped")
        .and(predicate::str::contains("skipped: dependency 'a' failed")),
    );
}

#[test]
fn second_run_reuses_build_caches() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["echo once"]);

  ws.bale_pipeline("run", &[]).assert().success();
  ws.bale_pipeline("run", &[])
    .assert()
    .success()
    .stdout(predicate::str::contains("build cached"));
}

#[test]
fn build_restricts_to_the_dependency_closure() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["echo a"]);
  ws.write_unit("b", &["a"], &["echo b"]);
  ws.write_unit("c", &[], &["echo c"]);

  ws.bale_pipeline("build", &["b"])
    .assert()
    .success()
    .stdout(
      predicate::str::contains("building 2 unit(s): a, b")
        .and(predicate::str::contains("2 succeeded"))
        .and(predicate::str::contains("c-1.0").not()),
    );
}

#[test]
fn build_unknown_unit_exits_2() {
  let ws = Workspace::new();
  ws.write_unit("a", &[], &["echo a"]);

  ws.bale_pipeline("build", &["nope"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("unknown unit"));
}

#[test]
fn empty_manifest_dir_succeeds_with_warning() {
  let ws = Workspace::new();

  ws.bale_pipeline("run", &[])
    .assert()
    .success()
    .stderr(predicate::str::contains("no unit manifests"));
}
