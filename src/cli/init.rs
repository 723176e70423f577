use std::path::PathBuf;

use anyhow::Context;

use pocketledger::settings::{load_settings, save_settings, shellexpand_path};
use pocketledger::store::Store;

pub fn run(data_dir: Option<String>) -> anyhow::Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        let resolved = PathBuf::from(shellexpand_path(&dir));
        std::fs::create_dir_all(&resolved)
            .with_context(|| format!("creating data directory {}", resolved.display()))?;
        settings.data_dir = resolved.to_string_lossy().to_string();
    }
    save_settings(&settings)?;

    let path = settings.store_path();
    let store = Store::open(&path, &settings)
        .with_context(|| format!("initializing store at {}", path.display()))?;
    println!("Initialized store at {}", path.display());
    println!("Version: {}", store.version()?);
    if let Some(failure) = store.repair_failure() {
        eprintln!("Warning: could not purge uncommitted transactions: {failure}");
    }
    Ok(())
}
