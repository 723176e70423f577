use std::fs::File;
use std::io;

use anyhow::Context;
use colored::Colorize;
use comfy_table::{Cell, Table};

use pocketledger::accounts::get_account;
use pocketledger::fmt::money;
use pocketledger::models::{instant_from_secs, ChangeType};
use pocketledger::views::{changes_extended, export_changes_csv, pending_changes};

use super::open_store;

pub fn list(account: i64, sequence: Option<i64>) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    let conn = store.conn();
    let currency = get_account(conn, account)?.currency;
    let changes = match sequence {
        Some(sequence) => pending_changes(conn, account, sequence)?,
        None => changes_extended(conn, account)?,
    };

    let mut table = Table::new();
    table.set_header(vec!["Seq", "Type", "UUID", "Parent", "Date", "Amount", "Payee", "Comment"]);
    for entry in &changes {
        let change = &entry.change;
        let kind = match change.change_type {
            ChangeType::Created => change.change_type.as_str().green(),
            ChangeType::Updated => change.change_type.as_str().yellow(),
            ChangeType::Deleted => change.change_type.as_str().red(),
        };
        let date = change
            .date
            .map(|secs| instant_from_secs(secs).format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(change.sync_sequence_local.map(|s| s.to_string()).unwrap_or_default()),
            Cell::new(kind.to_string()),
            Cell::new(&change.uuid),
            Cell::new(change.parent_uuid.as_deref().unwrap_or("")),
            Cell::new(date),
            Cell::new(change.amount.map(|a| money(a, &currency)).unwrap_or_default()),
            Cell::new(entry.payee_name.as_deref().unwrap_or("")),
            Cell::new(change.comment.as_deref().unwrap_or("")),
        ]);
    }
    println!("Changes for account {account}\n{table}");
    println!("{} record(s)", changes.len());
    Ok(())
}

pub fn export(account: i64, output: Option<String>) -> anyhow::Result<()> {
    let (_, store) = open_store()?;
    get_account(store.conn(), account)?;
    match output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {path}"))?;
            let written = export_changes_csv(store.conn(), account, file)?;
            println!("Exported {written} change(s) to {path}");
        }
        None => {
            export_changes_csv(store.conn(), account, io::stdout().lock())?;
        }
    }
    Ok(())
}
