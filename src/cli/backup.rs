use std::path::PathBuf;

use anyhow::Context;

use pocketledger::fmt::format_bytes;

use super::open_store;

pub fn run(output: Option<String>) -> anyhow::Result<()> {
    let (settings, store) = open_store()?;

    let dest_path = match output {
        Some(p) => PathBuf::from(p),
        None => {
            let backups_dir = PathBuf::from(&settings.data_dir).join("backups");
            std::fs::create_dir_all(&backups_dir)?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            backups_dir.join(format!("pocketledger-{stamp}.db"))
        }
    };

    store
        .backup_to(&dest_path)
        .with_context(|| format!("backing up to {}", dest_path.display()))?;

    let size = std::fs::metadata(&dest_path)?.len();
    println!("Backup saved to {}", dest_path.display());
    println!("Size: {}", format_bytes(size));
    Ok(())
}
