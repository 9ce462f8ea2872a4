//! bale-lib: a dependency-aware fetch/verify/build orchestrator.
//!
//! The library reads declarative unit manifests describing third-party
//! software (name, version, source, checksum, build flavor), resolves a
//! deterministic build order over the dependency graph, materializes
//! verified source trees through a content-keyed cache, and executes each
//! unit's build invocations in an isolated working directory under an
//! immutable injected environment.
//!
//! Entry points:
//! - [`manifest::load_dir`] / [`manifest::load_file`]: manifests → [`ManifestSet`]
//! - [`Pipeline::run`]: the full resolve → fetch → build pipeline
//! - [`graph::DependencyGraph`]: standalone order resolution (dry runs)

pub mod build;
pub mod cancel;
pub mod env;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod util;

pub use cancel::{CancelToken, Canceller};
pub use env::Environment;
pub use error::PipelineError;
pub use graph::DependencyGraph;
pub use manifest::{ManifestSet, Unit};
pub use pipeline::{Pipeline, PipelineConfig, RunReport, UnitReport, UnitStatus};
