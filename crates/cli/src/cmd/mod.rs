mod build;
mod plan;
mod run;

pub use build::cmd_build;
pub use plan::cmd_plan;
pub use run::cmd_run;
