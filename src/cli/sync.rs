use pocketledger::accounts::{disable_sync, enable_sync, get_account, increment_sync_sequence};

use super::open_store;

pub fn enable(account: i64, name: &str) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    enable_sync(store.conn(), account, name)?;
    println!("Sync enabled for account {account} as {name}");
    println!("Run `pocketledger sync bump {account}` to start logging changes.");
    Ok(())
}

pub fn disable(account: i64) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    let was_synced = get_account(store.conn(), account)?.is_synced();
    disable_sync(store.conn(), account)?;
    if was_synced {
        println!("Sync disabled for account {account}; its change log was discarded");
    } else {
        println!("Account {account} was not synced");
    }
    Ok(())
}

pub fn bump(account: i64) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    let sequence = increment_sync_sequence(store.conn(), account)?;
    println!("Account {account} sync sequence: {sequence}");
    Ok(())
}
