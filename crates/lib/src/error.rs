//! Top-level pipeline errors.
//!
//! These are the resolution-time failures that abort a run before any
//! fetch or build begins. Per-unit fetch/build failures never surface
//! here; they are isolated to the unit's subtree and reported through
//! [`crate::pipeline::RunReport`].

use thiserror::Error;

use crate::graph::GraphError;
use crate::manifest::ManifestError;
use crate::pipeline::ReportError;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Report(#[from] ReportError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
