use crate::cli::SeedArgs;
use crate::config::Config;
use crate::error::StoreError;
use crate::store::{FsStore, Store};
use std::path::Path;
use tracing::info;

pub fn execute(args: SeedArgs, config_path: &Path) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    let count = args.count.unwrap_or(config.seed_count);

    let written = seed_items(&FsStore::new(), &config.base_dir, count, args.force)?;
    println!("Seeded {} items in {}", written, config.base_dir.display());
    Ok(())
}

/// Write items named `1..=count`, each holding its own number
pub fn seed_items(
    store: &dyn Store,
    base: &Path,
    count: u64,
    force: bool,
) -> Result<u64, StoreError> {
    if force {
        info!("Wiping {}", base.display());
        store.remove(base)?;
    }
    store.ensure(base)?;

    for n in 1..=count {
        let value = i64::try_from(n).map_err(|_| StoreError::Parse {
            path: base.join(n.to_string()),
            content: n.to_string(),
        })?;
        store.write(base, &n.to_string(), value)?;
    }
    Ok(count)
}
