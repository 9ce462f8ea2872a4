//! The pipeline orchestrator.
//!
//! Drives resolve → fetch → build over a manifest set:
//! 1. Resolution runs first; a cycle or unresolved dependency aborts the
//!    run before anything is fetched or built.
//! 2. Units whose dependencies have all succeeded sit in a ready set
//!    (ordered by name, so dispatch is deterministic) and are handed to a
//!    bounded worker pool.
//! 3. Each worker fetches a verified source tree, then runs the unit's
//!    build steps.
//!
//! Failure policy: by default the first failure halts dispatch (in-flight
//! units drain and keep their results); with `keep_going` only the failed
//! unit's transitive dependents are skipped and independent branches
//! continue.
//!
//! Per unit the state machine is
//! `pending → fetching → fetched → building → succeeded | failed`, with
//! `skipped` for units never attempted. Terminal states are never left,
//! and ready-set updates happen only on the completion loop, which is the
//! single serialization point.

pub mod report;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::build::{self, BuildConfig, BuildError, BuildRecord};
use crate::cancel::CancelToken;
use crate::env::Environment;
use crate::error::PipelineError;
use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::graph::DependencyGraph;
use crate::manifest::{ManifestSet, Unit};

pub use report::{FailurePhase, ReportError, RunReport, UnitReport, UnitStatus};

/// Orchestrator configuration: resolved paths and policies.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Maximum units in flight at once; also the per-tool parallelism hint.
  pub jobs: usize,
  /// Skip only failed subtrees instead of halting on first failure.
  pub keep_going: bool,
  pub cache_dir: PathBuf,
  pub work_dir: PathBuf,
  pub install_dir: PathBuf,
}

impl PipelineConfig {
  pub fn new(cache_dir: PathBuf, work_dir: PathBuf, install_dir: PathBuf) -> Self {
    Self {
      jobs: default_jobs(),
      keep_going: false,
      cache_dir,
      work_dir,
      install_dir,
    }
  }

  pub fn with_jobs(mut self, jobs: usize) -> Self {
    self.jobs = jobs.max(1);
    self
  }

  pub fn with_keep_going(mut self, keep_going: bool) -> Self {
    self.keep_going = keep_going;
    self
  }
}

fn default_jobs() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Per-unit lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
  Pending,
  Fetching,
  Fetched,
  Building,
  Succeeded,
  Failed,
  Skipped,
}

impl UnitState {
  fn is_terminal(&self) -> bool {
    matches!(self, UnitState::Succeeded | UnitState::Failed | UnitState::Skipped)
  }
}

type States = Arc<Mutex<HashMap<String, UnitState>>>;

fn set_state(states: &States, name: &str, next: UnitState) {
  let mut states = states.lock().expect("state map lock");
  let current = states.get_mut(name).expect("unit tracked in state map");
  debug!(unit = name, from = ?current, to = ?next, "state transition");
  // Terminal states are never left.
  if !current.is_terminal() {
    *current = next;
  }
}

fn state_of(states: &States, name: &str) -> UnitState {
  *states.lock().expect("state map lock").get(name).expect("unit tracked")
}

/// What stopped a unit.
#[derive(Debug, Error)]
enum UnitFailure {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Build(#[from] BuildError),
}

impl UnitFailure {
  fn phase(&self) -> FailurePhase {
    match self {
      UnitFailure::Fetch(_) => FailurePhase::Fetch,
      UnitFailure::Build(_) => FailurePhase::Build,
    }
  }
}

type TaskResult = (String, u64, Result<(FetchOutcome, BuildRecord), UnitFailure>);

/// The resolve → fetch → build orchestrator.
pub struct Pipeline {
  units: ManifestSet,
  graph: DependencyGraph,
  env: Arc<Environment>,
  config: PipelineConfig,
  fetcher: Arc<Fetcher>,
}

impl Pipeline {
  /// Build a pipeline, validating that every dependency reference
  /// resolves.
  pub fn new(units: ManifestSet, env: Environment, config: PipelineConfig) -> Result<Self, PipelineError> {
    let graph = DependencyGraph::from_units(&units)?;
    let fetcher = Arc::new(Fetcher::new(config.cache_dir.clone()));

    Ok(Self {
      units,
      graph,
      env: Arc::new(env),
      config,
      fetcher,
    })
  }

  pub fn units(&self) -> &ManifestSet {
    &self.units
  }

  /// The total build order (dry-run surface; nothing is fetched or built).
  pub fn resolve_order(&self) -> Result<Vec<String>, crate::graph::GraphError> {
    self.graph.resolve_order()
  }

  /// Run the full pipeline.
  ///
  /// Resolution errors abort immediately; per-unit fetch/build failures are
  /// isolated to the unit's subtree and land in the [`RunReport`].
  pub async fn run(&self, cancel: &CancelToken) -> Result<RunReport, PipelineError> {
    let started_at = Utc::now();

    // Resolve first: a cycle means nothing gets fetched or built.
    self.graph.resolve_order()?;

    info!(
      units = self.units.len(),
      jobs = self.config.jobs,
      keep_going = self.config.keep_going,
      "starting pipeline"
    );

    let mut in_degree = self.graph.in_degrees();
    let mut ready: BTreeSet<String> = in_degree
      .iter()
      .filter(|(_, &deg)| deg == 0)
      .map(|(name, _)| name.clone())
      .collect();

    let states: States = Arc::new(Mutex::new(
      self.units.names().map(|n| (n.to_string(), UnitState::Pending)).collect(),
    ));

    let mut reports: BTreeMap<String, UnitReport> = BTreeMap::new();
    let mut halted = false;
    let jobs = self.config.jobs.max(1);
    let mut join_set: JoinSet<TaskResult> = JoinSet::new();

    loop {
      // Fill free worker slots from the ready set, unless a failure or
      // cancellation has stopped the run. A unit not yet handed to a
      // worker stays pending, so halting truly prevents it from starting.
      while !halted && !cancel.is_cancelled() && join_set.len() < jobs {
        let Some(name) = ready.pop_first() else {
          break;
        };
        self.dispatch(name, &mut join_set, &states, cancel);
      }

      // The completion loop is the only place the ready set changes.
      let Some(joined) = join_set.join_next().await else {
        break;
      };
      let (name, duration_ms, result) = match joined {
        Ok(v) => v,
        Err(e) => {
          error!(error = %e, "unit task panicked");
          continue;
        }
      };

      match result {
        Ok((outcome, record)) => {
          set_state(&states, &name, UnitState::Succeeded);
          info!(
            unit = %name,
            provenance = %outcome.provenance,
            build_cached = record.cached,
            duration_ms,
            "unit succeeded"
          );

          let mut unit_report = self.base_report(&name);
          unit_report.status = UnitStatus::Succeeded;
          unit_report.provenance = Some(outcome.provenance);
          unit_report.build_cached = record.cached;
          unit_report.duration_ms = duration_ms;
          unit_report.log_path = Some(record.log_path);
          reports.insert(name.clone(), unit_report);

          for dependent in self.graph.direct_dependents(&name) {
            let deg = in_degree.get_mut(&dependent).expect("dependent tracked");
            *deg -= 1;
            if *deg == 0 && state_of(&states, &dependent) == UnitState::Pending {
              ready.insert(dependent);
            }
          }
        }

        Err(failure) => {
          set_state(&states, &name, UnitState::Failed);
          warn!(unit = %name, phase = %failure.phase(), error = %failure, "unit failed");

          let mut unit_report = self.base_report(&name);
          unit_report.status = UnitStatus::Failed {
            phase: failure.phase(),
            error: failure.to_string(),
          };
          unit_report.duration_ms = duration_ms;
          if matches!(failure, UnitFailure::Build(_)) {
            unit_report.log_path = Some(self.log_path_for(&name));
          }
          reports.insert(name.clone(), unit_report);

          // The whole dependent subtree can never build; attribute every
          // skip to the failed root.
          for dependent in self.graph.dependents_closure(&name) {
            if state_of(&states, &dependent) == UnitState::Pending {
              set_state(&states, &dependent, UnitState::Skipped);
              let mut skip_report = self.base_report(&dependent);
              skip_report.status = UnitStatus::Skipped {
                failed_dependency: Some(name.clone()),
              };
              reports.insert(dependent, skip_report);
            }
          }

          if !self.config.keep_going {
            halted = true;
            info!("halting dispatch after failure");
          }
        }
      }
    }

    // Units still pending were never attempted: the run halted or was
    // cancelled first.
    {
      let states = states.lock().expect("state map lock");
      for (name, state) in states.iter() {
        if *state == UnitState::Pending && !reports.contains_key(name) {
          let mut skip_report = self.base_report(name);
          skip_report.status = UnitStatus::Skipped { failed_dependency: None };
          reports.insert(name.clone(), skip_report);
        }
      }
    }

    let run_report = RunReport {
      started_at,
      finished_at: Utc::now(),
      cancelled: cancel.is_cancelled(),
      units: reports,
    };

    info!(
      succeeded = run_report.succeeded(),
      failed = run_report.failed(),
      skipped = run_report.skipped(),
      cancelled = run_report.cancelled,
      "pipeline complete"
    );

    Ok(run_report)
  }

  fn dispatch(&self, name: String, join_set: &mut JoinSet<TaskResult>, states: &States, cancel: &CancelToken) {
    let unit: Unit = self.units.get(&name).expect("ready units are in the set").clone();
    let env = self.env.clone();
    let fetcher = self.fetcher.clone();
    let build_config = BuildConfig {
      work_dir: self.config.work_dir.clone(),
      install_dir: self.config.install_dir.clone(),
      jobs: self.config.jobs,
    };
    let states = states.clone();
    let cancel = cancel.clone();

    debug!(unit = %name, "dispatching");
    join_set.spawn(async move {
      let started = Instant::now();

      let result = run_unit(&unit, &fetcher, &env, &build_config, &states, &cancel).await;

      (unit.name, started.elapsed().as_millis() as u64, result)
    });
  }

  fn base_report(&self, name: &str) -> UnitReport {
    let unit = self.units.get(name).expect("reported units are in the set");
    UnitReport {
      name: unit.name.clone(),
      version: unit.version.clone(),
      license: unit.license.clone(),
      status: UnitStatus::Skipped { failed_dependency: None },
      provenance: None,
      build_cached: false,
      duration_ms: 0,
      log_path: None,
    }
  }

  fn log_path_for(&self, name: &str) -> PathBuf {
    let unit = self.units.get(name).expect("reported units are in the set");
    self.config.work_dir.join("logs").join(format!("{}.log", unit.id()))
  }
}

/// One unit's fetch → build, with state transitions.
async fn run_unit(
  unit: &Unit,
  fetcher: &Fetcher,
  env: &Environment,
  build_config: &BuildConfig,
  states: &States,
  cancel: &CancelToken,
) -> Result<(FetchOutcome, BuildRecord), UnitFailure> {
  set_state(states, &unit.name, UnitState::Fetching);
  let outcome = fetcher.fetch(unit, cancel).await?;
  set_state(states, &unit.name, UnitState::Fetched);

  set_state(states, &unit.name, UnitState::Building);
  let record = build::run_build(unit, &outcome.source_dir, &outcome.digest, env, build_config, cancel).await?;

  Ok((outcome, record))
}
