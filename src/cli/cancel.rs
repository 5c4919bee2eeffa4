use crate::cli::CancelArgs;
use crate::config::Config;
use crate::gate::{CancellationGate, FileGate};
use std::path::Path;
use tracing::info;

pub fn execute(args: CancelArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load_or_default(config_path)?;
    let gate = FileGate::new(&config.state_dir, config.cancel_ttl_sec);

    gate.cancel(&args.id)?;
    info!("Flag for {} expires in {}s", args.id, config.cancel_ttl_sec);
    println!("Cancelled {}", args.id);
    Ok(())
}
