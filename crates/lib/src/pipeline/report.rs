//! Per-run reporting.
//!
//! Every unit ends a run in exactly one terminal state; the run report
//! collects them with timing and provenance and can persist itself as JSON
//! at pipeline end.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::fetch::Provenance;

/// Errors persisting a run report.
#[derive(Debug, Error)]
pub enum ReportError {
  #[error("failed to write report: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to serialize report: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Which pipeline stage a unit failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
  Fetch,
  Build,
}

impl std::fmt::Display for FailurePhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FailurePhase::Fetch => f.write_str("fetch"),
      FailurePhase::Build => f.write_str("build"),
    }
  }
}

/// Terminal state of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
  Succeeded,
  Failed {
    phase: FailurePhase,
    error: String,
  },
  /// Never attempted: an ancestor failed (named), or the run halted or was
  /// cancelled before the unit was dispatched (`None`).
  Skipped {
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_dependency: Option<String>,
  },
}

impl UnitStatus {
  pub fn is_succeeded(&self) -> bool {
    matches!(self, UnitStatus::Succeeded)
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, UnitStatus::Failed { .. })
  }

  pub fn is_skipped(&self) -> bool {
    matches!(self, UnitStatus::Skipped { .. })
  }
}

/// Outcome of one unit for one run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
  pub name: String,
  pub version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub license: Option<String>,
  pub status: UnitStatus,
  /// How the source materialized; `None` when the unit never reached the
  /// fetch stage.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provenance: Option<Provenance>,
  /// True when a matching build marker skipped the process invocations.
  pub build_cached: bool,
  pub duration_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log_path: Option<PathBuf>,
}

/// The full pipeline run outcome.
#[derive(Debug, Serialize)]
pub struct RunReport {
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub cancelled: bool,
  pub units: BTreeMap<String, UnitReport>,
}

impl RunReport {
  /// True when every unit succeeded and the run was not cancelled.
  pub fn is_success(&self) -> bool {
    !self.cancelled && self.units.values().all(|u| u.status.is_succeeded())
  }

  pub fn succeeded(&self) -> usize {
    self.units.values().filter(|u| u.status.is_succeeded()).count()
  }

  pub fn failed(&self) -> usize {
    self.units.values().filter(|u| u.status.is_failed()).count()
  }

  pub fn skipped(&self) -> usize {
    self.units.values().filter(|u| u.status.is_skipped()).count()
  }

  pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
    self.units.values().filter(|u| u.status.is_failed())
  }

  /// Whether any unit failed in the given phase.
  pub fn failed_in(&self, phase: FailurePhase) -> bool {
    self
      .units
      .values()
      .any(|u| matches!(&u.status, UnitStatus::Failed { phase: p, .. } if *p == phase))
  }

  pub fn duration(&self) -> std::time::Duration {
    (self.finished_at - self.started_at).to_std().unwrap_or_default()
  }

  /// Persist the report as pretty JSON.
  pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(self)?;
    std::fs::write(path, format!("{}\n", json))?;
    Ok(())
  }
}
