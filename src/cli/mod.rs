pub mod cancel;
pub mod run;
pub mod schema;
pub mod seed;
pub mod status;

use crate::config::Combine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "treereduce")]
#[command(
    author,
    version,
    about = "Reduce numbered work items pairwise, round by round, until one result remains"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "treereduce.yaml")]
    pub config: PathBuf,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write items 1..=N into the base directory
    Seed(SeedArgs),

    /// Run one reduction to completion
    Run(RunArgs),

    /// Flag a run, batch or job id as cancelled
    Cancel(CancelArgs),

    /// Show recorded runs
    Status(StatusArgs),

    /// Print JSON Schema for config validation
    Schema(SchemaArgs),
}

#[derive(Parser, Clone)]
pub struct SeedArgs {
    /// Number of items to create (default: seed_count from config)
    #[arg(long)]
    pub count: Option<u64>,

    /// Override base directory
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Wipe the base directory first
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Override base directory
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Override round 1 input directory
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Wipe the base directory and seed it with items 1..=N first
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Remove intermediates and results left by a previous run
    #[arg(long)]
    pub clean: bool,

    /// Override max merge tasks running at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override items merged per task
    #[arg(long)]
    pub fan_in: Option<usize>,

    /// Override combinator (sum, product, min, max)
    #[arg(long)]
    pub combine: Option<Combine>,

    /// Use a fixed run id (lets `cancel` target the run before it starts)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Show plan without executing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone)]
pub struct CancelArgs {
    /// Run, batch or job id
    pub id: String,
}

#[derive(Parser, Clone)]
pub struct StatusArgs {
    /// Print the full record of one run as JSON
    pub run_id: Option<String>,
}

#[derive(Parser, Clone)]
pub struct SchemaArgs {
    /// Write the schema to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
