use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod config;
mod error;
mod gate;
mod queue;
mod runner;
mod state;
mod store;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing - debug detail only with --verbose
    let filter = if cli.verbose {
        EnvFilter::new("treereduce=debug")
    } else {
        EnvFilter::new("treereduce=info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Seed(args) => cli::seed::execute(args, &cli.config),
        Commands::Run(args) => cli::run::execute(args, &cli.config).await,
        Commands::Cancel(args) => cli::cancel::execute(args, &cli.config),
        Commands::Status(args) => cli::status::execute(args, &cli.config),
        Commands::Schema(args) => cli::schema::execute(args),
    }
}
