use std::sync::OnceLock;

use log::info;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::bookkeeping;
use crate::capture::WriteContext;
use crate::error::{LedgerError, Result};
use crate::models::{Account, NewAccount, TransactionUpdate};
use crate::store::atomically;
use crate::transactions::update_transaction;

static CURRENCY_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn validate_currency(code: &str) -> Result<()> {
    let re = CURRENCY_RE
        .get_or_init(|| Regex::new(r"^[A-Z]{3}$"))
        .as_ref()
        .map_err(|e| LedgerError::Other(e.to_string()))?;
    if re.is_match(code) {
        Ok(())
    } else {
        Err(LedgerError::InvalidCurrency(code.to_string()))
    }
}

pub fn insert_account(conn: &Connection, account: &NewAccount) -> Result<i64> {
    validate_currency(&account.currency)?;
    let uuid = account
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    atomically(conn, "insert_account", |conn| {
        conn.execute(
            "INSERT INTO accounts (label, opening_balance, description, currency, type, color,
                 grouping, exclude_from_totals, uuid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.label,
                account.opening_balance,
                account.description,
                account.currency,
                account.account_type,
                account.color,
                account.grouping,
                account.exclude_from_totals,
                uuid,
            ],
        )?;
        let id = conn.last_insert_rowid();
        bookkeeping::assign_sort_key(conn, id)?;
        Ok(id)
    })
}

pub fn get_account(conn: &Connection, id: i64) -> Result<Account> {
    conn.query_row("SELECT * FROM accounts WHERE _id = ?1", [id], Account::from_row)
        .optional()?
        .ok_or(LedgerError::UnknownAccount(id))
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare("SELECT * FROM accounts ORDER BY sort_key, _id")?;
    let accounts = stmt
        .query_map([], Account::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Remove an account together with its transactions, templates and change log.
///
/// Transfer halves living in other accounts stay behind as plain
/// transactions. No change records are written for the removed rows.
pub fn delete_account(conn: &Connection, ctx: WriteContext, id: i64) -> Result<()> {
    get_account(conn, id)?;
    atomically(conn, "delete_account", |conn| {
        let peers: Vec<i64> = conn
            .prepare(
                "SELECT _id FROM transactions WHERE account_id != ?1 AND (transfer_account = ?1
                     OR transfer_peer IN (SELECT _id FROM transactions WHERE account_id = ?1))",
            )?
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        let detach = TransactionUpdate {
            transfer_peer: Some(None),
            transfer_account: Some(None),
            ..Default::default()
        };
        for peer in &peers {
            update_transaction(conn, ctx, *peer, &detach)?;
        }

        let uris: Vec<String> = conn
            .prepare("SELECT DISTINCT picture_id FROM transactions WHERE account_id = ?1 AND picture_id IS NOT NULL")?
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        conn.execute("DELETE FROM accounts WHERE _id = ?1", [id])?;
        for uri in &uris {
            bookkeeping::release_uri(conn, uri)?;
        }
        info!("deleted account {id}, detached {} transfer peers", peers.len());
        Ok(())
    })
}

/// Link an account to a sync backend.
///
/// Rows written before uuids existed get one here; both halves of a transfer
/// share it. The local sequence is left alone, so nothing is logged until the
/// first `increment_sync_sequence`.
pub fn enable_sync(conn: &Connection, id: i64, sync_account_name: &str) -> Result<()> {
    get_account(conn, id)?;
    atomically(conn, "enable_sync", |conn| {
        conn.execute(
            "UPDATE accounts SET sync_account_name = ?1 WHERE _id = ?2",
            params![sync_account_name, id],
        )?;
        let missing: Vec<(i64, Option<i64>)> = conn
            .prepare("SELECT _id, transfer_peer FROM transactions WHERE account_id = ?1 AND uuid IS NULL")?
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        for (row_id, peer) in missing {
            let peer_uuid: Option<String> = match peer {
                Some(peer) => conn
                    .query_row("SELECT uuid FROM transactions WHERE _id = ?1", [peer], |r| r.get(0))
                    .optional()?
                    .flatten(),
                None => None,
            };
            let uuid = peer_uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            conn.execute(
                "UPDATE transactions SET uuid = ?1 WHERE _id = ?2 OR (_id = ?3 AND uuid IS NULL)",
                params![uuid, row_id, peer],
            )?;
        }
        Ok(())
    })
}

/// Unlink an account from sync; its sequence drops to 0 and its change log is discarded.
pub fn disable_sync(conn: &Connection, id: i64) -> Result<()> {
    let account = get_account(conn, id)?;
    atomically(conn, "disable_sync", |conn| {
        conn.execute(
            "UPDATE accounts SET sync_account_name = NULL WHERE _id = ?1",
            [id],
        )?;
        if account.is_synced() {
            bookkeeping::on_sync_disabled(conn, id)?;
        }
        Ok(())
    })
}

/// Advance the local sync sequence, returning the new value.
pub fn increment_sync_sequence(conn: &Connection, id: i64) -> Result<i64> {
    get_account(conn, id)?;
    atomically(conn, "increment_sync_sequence", |conn| {
        conn.execute(
            "UPDATE accounts SET sync_sequence_local = coalesce(sync_sequence_local, 0) + 1
             WHERE _id = ?1",
            [id],
        )?;
        let sequence = conn.query_row(
            "SELECT sync_sequence_local FROM accounts WHERE _id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(sequence)
    })
}

pub fn set_exclude_from_totals(conn: &Connection, id: i64, exclude: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET exclude_from_totals = ?1 WHERE _id = ?2",
        params![exclude, id],
    )?;
    if changed == 0 {
        return Err(LedgerError::UnknownAccount(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookkeeping::take_stale_uris;
    use crate::models::{AccountType, NewTransaction, NewTransfer};
    use crate::settings::Settings;
    use crate::store::Store;
    use crate::transactions::{get_transaction, insert_transaction, insert_transfer};
    use chrono::Utc;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_string_lossy().to_string(),
            ..Settings::default()
        };
        let store = Store::open(&settings.store_path(), &settings).unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_assigns_uuid_and_next_sort_key() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let mut bank = NewAccount::new("Bank", "CHF");
        bank.account_type = AccountType::Bank;
        let id = insert_account(conn, &bank).unwrap();
        let account = get_account(conn, id).unwrap();
        assert_eq!(account.sort_key, Some(2));
        assert_eq!(account.account_type, AccountType::Bank);
        assert_eq!(account.uuid.as_ref().map(|u| u.len()), Some(36));
        assert_eq!(account.sync_sequence_local, 0);
    }

    #[test]
    fn test_sort_key_follows_current_maximum() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let second = insert_account(conn, &NewAccount::new("B", "EUR")).unwrap();
        delete_account(conn, WriteContext::LOCAL, second).unwrap();
        let third = insert_account(conn, &NewAccount::new("C", "EUR")).unwrap();
        // the maximum moved back down with the delete
        assert_eq!(get_account(conn, third).unwrap().sort_key, Some(2));
        let labels: Vec<String> = list_accounts(conn).unwrap().into_iter().map(|a| a.label).collect();
        assert_eq!(labels, vec!["Default account".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_invalid_currency_is_rejected() {
        let (_dir, store) = test_store();
        let err = insert_account(store.conn(), &NewAccount::new("X", "eur")).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCurrency(code) if code == "eur"));
    }

    #[test]
    fn test_currency_codes_are_three_capitals() {
        for code in ["EUR", "USD", "XAU"] {
            assert!(validate_currency(code).is_ok(), "{code}");
        }
        for code in ["", "EU", "EURO", "Eur", "E1R", " EUR"] {
            assert!(matches!(validate_currency(code), Err(LedgerError::InvalidCurrency(_))), "{code:?}");
        }
    }

    #[test]
    fn test_duplicate_uuid_is_a_constraint_violation() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let existing = get_account(conn, 1).unwrap().uuid;
        let mut dup = NewAccount::new("Dup", "EUR");
        dup.uuid = existing;
        let err = insert_account(conn, &dup).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(list_accounts(conn).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_account() {
        let (_dir, store) = test_store();
        assert!(matches!(get_account(store.conn(), 42), Err(LedgerError::UnknownAccount(42))));
        assert!(set_exclude_from_totals(store.conn(), 42, true).is_err());
    }

    #[test]
    fn test_disable_sync_resets_sequence_and_log() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        enable_sync(conn, 1, "remote").unwrap();
        assert_eq!(increment_sync_sequence(conn, 1).unwrap(), 1);
        insert_transaction(conn, WriteContext::LOCAL, &NewTransaction::new(1, 100, Utc::now()))
            .unwrap();
        let logged: i64 = conn
            .query_row("SELECT count(*) FROM changes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(logged, 1);

        disable_sync(conn, 1).unwrap();
        enable_sync(conn, 1, "remote").unwrap();
        let account = get_account(conn, 1).unwrap();
        assert_eq!(account.sync_sequence_local, 0);
        let logged: i64 = conn
            .query_row("SELECT count(*) FROM changes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(logged, 0);
    }

    #[test]
    fn test_enable_sync_seeds_missing_uuids_across_peers() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let bank = insert_account(conn, &NewAccount::new("Bank", "EUR")).unwrap();
        let (from, to) = insert_transfer(
            conn,
            WriteContext::LOCAL,
            &NewTransfer::new(1, bank, 2500, Utc::now()),
        )
        .unwrap();
        conn.execute("UPDATE transactions SET uuid = NULL", []).unwrap();
        enable_sync(conn, 1, "remote").unwrap();
        let a = get_transaction(conn, from).unwrap().uuid;
        let b = get_transaction(conn, to).unwrap().uuid;
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_delete_account_detaches_peers_and_releases_attachments() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let bank = insert_account(conn, &NewAccount::new("Bank", "EUR")).unwrap();
        let (from, to) = insert_transfer(
            conn,
            WriteContext::LOCAL,
            &NewTransfer::new(1, bank, 2500, Utc::now()),
        )
        .unwrap();
        let mut receipt = NewTransaction::new(bank, -100, Utc::now());
        receipt.picture_uri = Some("file:///p/r.jpg".to_string());
        insert_transaction(conn, WriteContext::LOCAL, &receipt).unwrap();

        delete_account(conn, WriteContext::LOCAL, bank).unwrap();
        let survivor = get_transaction(conn, from).unwrap();
        assert_eq!(survivor.transfer_peer, None);
        assert_eq!(survivor.transfer_account, None);
        assert!(get_transaction(conn, to).is_err());
        assert_eq!(take_stale_uris(conn).unwrap(), vec!["file:///p/r.jpg".to_string()]);
    }
}
