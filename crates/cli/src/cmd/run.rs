//! Implementation of the `bale run` command.
//!
//! Loads every unit manifest in the target directory and drives the full
//! resolve → fetch → build pipeline, printing a per-unit summary and
//! mapping the outcome to the exit-code classes (0 success, 2 resolution,
//! 3 fetch, 4 build, 130 cancelled).

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use bale_lib::pipeline::{FailurePhase, RunReport, UnitStatus};
use bale_lib::{Environment, ManifestSet, Pipeline, cancel, manifest};

use crate::PipelineArgs;
use crate::output::{self, symbols};

/// Execute the run command.
pub async fn cmd_run(args: &PipelineArgs) -> Result<i32> {
  let units = match manifest::load_dir(&args.dir) {
    Ok(units) => units,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  if units.is_empty() {
    output::print_warning(&format!("no unit manifests found in {}", args.dir.display()));
    return Ok(0);
  }

  run_pipeline(units, args).await
}

/// Shared driver for `run` and `build`: construct the pipeline, wire up
/// ctrl-c cancellation, run, and report.
pub(crate) async fn run_pipeline(units: ManifestSet, args: &PipelineArgs) -> Result<i32> {
  let config = args.to_config();
  let env = Environment::standard(&config.install_dir);

  let pipeline = match Pipeline::new(units, env, config) {
    Ok(pipeline) => pipeline,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  let (canceller, token) = cancel::channel();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      canceller.cancel();
    }
  });

  let report = match pipeline.run(&token).await {
    Ok(report) => report,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  print_report(&report);

  if let Some(path) = &args.report {
    report.write_json(path)?;
    output::print_info(&format!("report written to {}", path.display()));
  }

  Ok(exit_code(&report))
}

fn print_report(report: &RunReport) {
  println!();
  for unit in report.units.values() {
    let id = format!("{}-{}", unit.name, unit.version);
    match &unit.status {
      UnitStatus::Succeeded => {
        let provenance = unit
          .provenance
          .map(|p| p.to_string())
          .unwrap_or_else(|| "unknown".to_string());
        let detail = if unit.build_cached {
          format!("{}, build cached", provenance)
        } else {
          provenance
        };
        println!(
          "  {} {} ({}, {})",
          symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
          id,
          detail,
          output::format_duration(std::time::Duration::from_millis(unit.duration_ms)),
        );
      }
      UnitStatus::Failed { phase, error } => {
        println!(
          "  {} {} ({} failed)",
          symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
          id,
          phase,
        );
        println!("      {}", error.if_supports_color(Stream::Stdout, |s| s.red()));
        if let Some(log_path) = &unit.log_path {
          print_log_tail(log_path);
        }
      }
      UnitStatus::Skipped { failed_dependency } => {
        let reason = match failed_dependency {
          Some(dep) => format!("skipped: dependency '{}' failed", dep),
          None => "skipped: run stopped".to_string(),
        };
        println!(
          "  {} {} ({})",
          symbols::SKIPPED.if_supports_color(Stream::Stdout, |s| s.dimmed()),
          id,
          reason,
        );
      }
    }
  }

  println!();
  println!(
    "{} succeeded, {} failed, {} skipped in {}",
    report.succeeded(),
    report.failed(),
    report.skipped(),
    output::format_duration(report.duration()),
  );
}

/// Print the last lines of a failed unit's build log, indented.
fn print_log_tail(log_path: &std::path::Path) {
  const TAIL: usize = 15;

  let Ok(content) = std::fs::read_to_string(log_path) else {
    return;
  };
  let lines: Vec<&str> = content.lines().collect();
  let start = lines.len().saturating_sub(TAIL);

  println!("      {}", format!("--- {} ---", log_path.display()).dimmed());
  for line in &lines[start..] {
    println!("      {}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
  }
}

fn exit_code(report: &RunReport) -> i32 {
  if report.cancelled {
    130
  } else if report.is_success() {
    0
  } else if report.failed_in(FailurePhase::Build) {
    4
  } else if report.failed_in(FailurePhase::Fetch) {
    3
  } else {
    // Units were skipped without any recorded failure.
    1
  }
}
