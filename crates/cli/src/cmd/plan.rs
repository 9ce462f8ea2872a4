//! Implementation of the `bale plan` command.
//!
//! Dry run: resolve the build order and print it. Nothing is fetched or
//! built.

use std::path::Path;

use anyhow::Result;

use bale_lib::{DependencyGraph, manifest};

use crate::output;

pub fn cmd_plan(dir: &Path) -> Result<i32> {
  let units = match manifest::load_dir(dir) {
    Ok(units) => units,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  if units.is_empty() {
    output::print_warning(&format!("no unit manifests found in {}", dir.display()));
    return Ok(0);
  }

  let graph = match DependencyGraph::from_units(&units) {
    Ok(graph) => graph,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  let order = match graph.resolve_order() {
    Ok(order) => order,
    Err(e) => {
      output::print_error(&e.to_string());
      return Ok(2);
    }
  };

  output::print_info(&format!("build order for {} unit(s):", order.len()));
  for (position, name) in order.iter().enumerate() {
    let unit = units.get(name).expect("ordered units are in the set");
    let deps = if unit.dependencies.is_empty() {
      String::new()
    } else {
      format!("  (after {})", unit.dependencies.join(", "))
    };
    println!("{:>4}. {}-{}{}", position + 1, unit.name, unit.version, deps);
  }

  Ok(0)
}
