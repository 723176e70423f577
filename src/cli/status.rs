use colored::Colorize;
use rusqlite::Connection;

use pocketledger::fmt::format_bytes;
use pocketledger::settings::load_settings;

use super::open_store;

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [], |r| r.get(0))
}

pub fn run() -> anyhow::Result<()> {
    let settings = load_settings();
    let path = settings.store_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Store:      {}", path.display());
    if !path.exists() {
        println!();
        println!("Store not found. Run `pocketledger init` to set up.");
        return Ok(());
    }
    println!("Size:       {}", format_bytes(std::fs::metadata(&path)?.len()));

    let (_, store) = open_store()?;
    let conn = store.conn();
    println!("Version:    {}", store.version()?);
    if let Some(failure) = store.repair_failure() {
        println!("Repair:     {}", failure.yellow());
    }

    println!();
    println!("Accounts:      {}", count(conn, "SELECT count(*) FROM accounts")?);
    println!(
        "Synced:        {}",
        count(conn, "SELECT count(*) FROM accounts WHERE sync_account_name IS NOT NULL")?
    );
    println!("Transactions:  {}", count(conn, "SELECT count(*) FROM transactions")?);
    println!("Templates:     {}", count(conn, "SELECT count(*) FROM templates")?);
    println!("Changes:       {}", count(conn, "SELECT count(*) FROM changes")?);
    println!("Stale files:   {}", count(conn, "SELECT count(*) FROM stale_uris")?);
    Ok(())
}
