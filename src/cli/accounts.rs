use anyhow::bail;
use colored::Colorize;
use comfy_table::{Cell, Table};

use pocketledger::accounts::{delete_account, insert_account, list_accounts};
use pocketledger::bookkeeping::take_stale_uris;
use pocketledger::capture::WriteContext;
use pocketledger::fmt::money;
use pocketledger::models::{AccountType, NewAccount};

use super::open_store;

pub fn add(
    label: &str,
    currency: Option<&str>,
    account_type: &str,
    opening_balance: i64,
    description: Option<&str>,
) -> anyhow::Result<()> {
    let (settings, store) = open_store()?;
    let Some(account_type) = AccountType::parse(&account_type.to_uppercase()) else {
        let known: Vec<&str> = AccountType::ALL.iter().map(AccountType::as_str).collect();
        bail!("unknown account type {account_type} (expected one of {})", known.join(", "));
    };
    let mut account = NewAccount::new(label, currency.unwrap_or(&settings.local_currency));
    account.account_type = account_type;
    account.opening_balance = opening_balance;
    account.description = description.map(str::to_string);
    let id = insert_account(store.conn(), &account)?;
    println!("Added account {id}: {label}");
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    let accounts = list_accounts(store.conn())?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Label", "Type", "Opening", "Sync", "Seq", "Uses"]);
    for account in accounts {
        let sync = match &account.sync_account_name {
            Some(name) => name.green().to_string(),
            None => "-".dimmed().to_string(),
        };
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(&account.label),
            Cell::new(account.account_type.as_str()),
            Cell::new(money(account.opening_balance, &account.currency)),
            Cell::new(sync),
            Cell::new(account.sync_sequence_local),
            Cell::new(account.usages),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub fn delete(id: i64) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    store.write(|conn| delete_account(conn, WriteContext::LOCAL, id))?;
    println!("Deleted account {id}");
    let stale = take_stale_uris(store.conn())?;
    for uri in stale {
        println!("  attachment no longer referenced: {uri}");
    }
    Ok(())
}
