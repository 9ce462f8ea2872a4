//! bale: fetch, verify, and build bundled third-party software.

mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bale_lib::{PipelineConfig, paths};

/// bale - dependency-aware fetch/verify/build orchestrator
#[derive(Parser)]
#[command(name = "bale")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Shared pipeline flags.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
  /// Directory of unit manifest files (one TOML file per unit)
  #[arg(default_value = ".")]
  pub dir: PathBuf,

  /// Maximum units fetched/built in parallel
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Continue independent branches after a failure instead of halting
  #[arg(long)]
  pub keep_going: bool,

  /// Source cache directory
  #[arg(long)]
  pub cache_dir: Option<PathBuf>,

  /// Build working directory (build trees and logs)
  #[arg(long)]
  pub work_dir: Option<PathBuf>,

  /// Install prefix for built artifacts
  #[arg(long)]
  pub install_dir: Option<PathBuf>,

  /// Write a JSON run report to this path
  #[arg(long)]
  pub report: Option<PathBuf>,
}

impl PipelineArgs {
  fn to_config(&self) -> PipelineConfig {
    let mut config = PipelineConfig::new(
      self.cache_dir.clone().unwrap_or_else(paths::source_cache_dir),
      self.work_dir.clone().unwrap_or_else(paths::work_dir),
      self.install_dir.clone().unwrap_or_else(paths::install_dir),
    )
    .with_keep_going(self.keep_going);

    if let Some(jobs) = self.jobs {
      config = config.with_jobs(jobs);
    }
    config
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full pipeline over a manifest directory
  Run(PipelineArgs),

  /// Build a single unit and its dependency closure
  Build {
    /// The unit to build
    unit: String,

    #[command(flatten)]
    args: PipelineArgs,
  },

  /// Print the resolved build order without fetching or building
  Plan {
    /// Directory of unit manifest files
    #[arg(default_value = ".")]
    dir: PathBuf,
  },
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("bale=debug,bale_lib=debug")
  } else {
    EnvFilter::from_default_env()
  };
  tracing_subscriber::fmt().with_env_filter(filter).without_time().init();

  let result = match &cli.command {
    Commands::Run(args) => cmd::cmd_run(args).await,
    Commands::Build { unit, args } => cmd::cmd_build(unit, args).await,
    Commands::Plan { dir } => cmd::cmd_plan(dir),
  };

  match result {
    Ok(code) => std::process::exit(code),
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      std::process::exit(1);
    }
  }
}
