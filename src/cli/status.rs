use crate::cli::StatusArgs;
use crate::config::Config;
use crate::state::RunRecord;
use std::path::Path;

pub fn execute(args: StatusArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load_or_default(config_path)?;

    if let Some(run_id) = args.run_id {
        let record = RunRecord::load(&config.state_dir, &run_id)
            .ok_or_else(|| anyhow::anyhow!("No record for run {}", run_id))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let records = RunRecord::load_all(&config.state_dir);
    if records.is_empty() {
        println!("No runs recorded in {}", config.state_dir.display());
        return Ok(());
    }

    for record in &records {
        let error = record
            .error
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        println!(
            "{}  {}  {} rounds  {}{}",
            record.run_id,
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.rounds.len(),
            record.phase,
            error
        );
    }
    Ok(())
}
