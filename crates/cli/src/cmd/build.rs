//! Implementation of the `bale build` command.
//!
//! Builds one unit plus its transitive dependency closure, leaving every
//! other unit in the manifest directory untouched.

use anyhow::Result;

use bale_lib::{DependencyGraph, manifest};

use crate::PipelineArgs;
use crate::output;

use super::run::run_pipeline;

pub async fn cmd_build(unit: &str, args: &PipelineArgs) -> Result<i32> {
  let units = match manifest::load_dir(&args.dir) {
    Ok(units) => units,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  let graph = match DependencyGraph::from_units(&units) {
    Ok(graph) => graph,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  let closure = match graph.dependency_closure(unit) {
    Ok(closure) => closure,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  let names: Vec<&str> = closure.iter().map(String::as_str).collect();
  output::print_info(&format!("building {} unit(s): {}", closure.len(), names.join(", ")));

  run_pipeline(units.subset(&closure), args).await
}
