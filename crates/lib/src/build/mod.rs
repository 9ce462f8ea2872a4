//! Build execution: flavor adapters and step running.

pub mod execute;
pub mod flavor;

pub use execute::{BuildConfig, BuildError, BuildRecord, run_build};
pub use flavor::{BuildContext, Flavor, ProcessSpec};
