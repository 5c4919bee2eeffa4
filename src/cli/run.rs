use crate::cli::seed::seed_items;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::gate::FileGate;
use crate::runner::{expected_rounds, ReductionDriver, RunOptions, RunOutcome};
use crate::store::{FsStore, Store};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn execute(args: RunArgs, config_path: &Path) -> anyhow::Result<()> {
    // Load and validate config
    info!("Loading config from {:?}", config_path);
    let mut config = Config::load_or_default(config_path)?;

    // Apply CLI overrides
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    if let Some(input_dir) = args.input_dir {
        config.input_dir = Some(input_dir);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(fan_in) = args.fan_in {
        config.fan_in = fan_in;
    }
    if let Some(combine) = args.combine {
        config.combine = combine;
    }
    config.validate()?;

    let store = Arc::new(FsStore::new());

    if args.dry_run {
        print_execution_plan(&config, store.as_ref(), args.seed);
        return Ok(());
    }

    if let Some(count) = args.seed {
        seed_items(store.as_ref(), &config.base_dir, count, true)?;
        info!("Seeded {} items in {}", count, config.base_dir.display());
    }

    let gate = FileGate::new(&config.state_dir, config.cancel_ttl_sec);
    gate.prune()?;

    let options = RunOptions {
        clean: args.clean,
        run_id: args.run_id,
    };
    let driver = ReductionDriver::new(config, store, Arc::new(gate));
    let report = driver.run(&options).await?;

    match report.outcome {
        RunOutcome::Converged { value, result_path } => {
            println!("Reached final result = {}", value);
            println!(
                "Run {} finished {} rounds in {:.1}s; result at {}",
                report.run_id,
                report.rounds,
                report.total_duration.as_secs_f64(),
                result_path.display()
            );
        }
        RunOutcome::Cancelled { round } => {
            println!("Run {} cancelled in round {}", report.run_id, round);
        }
    }

    Ok(())
}

fn print_execution_plan(config: &Config, store: &dyn Store, seed: Option<u64>) {
    println!("\n=== Execution Plan ===\n");
    println!("Base dir: {:?}", config.base_dir);
    println!("Input dir: {:?}", config.input_dir());
    println!("Combine: {} with fan-in {}", config.combine, config.fan_in);
    println!("Concurrency: {}", config.concurrency);

    let items = match seed {
        Some(count) => Some(count as usize),
        None => store.list(&config.input_dir()).ok().map(|items| items.len()),
    };
    match items {
        Some(n) => println!(
            "Items: {} -> {} rounds",
            n,
            expected_rounds(n, config.fan_in)
        ),
        None => println!("Items: input directory not readable"),
    }
    println!();
}
