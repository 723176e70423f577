//! Derived statistics kept next to the ledger rows: usage counters,
//! last-used timestamps, account sort keys, sync resets and stale
//! attachment references.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{Transaction, SPLIT_CATID};
use crate::store::atomically;

fn bump_category(conn: &Connection, cat_id: i64) -> Result<()> {
    if cat_id == SPLIT_CATID {
        return Ok(());
    }
    conn.execute(
        "UPDATE categories SET usages = coalesce(usages, 0) + 1, last_used = strftime('%s', 'now')
         WHERE _id IN (?1, (SELECT parent_id FROM categories WHERE _id = ?1))",
        [cat_id],
    )?;
    Ok(())
}

fn bump_account(conn: &Connection, account_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET usages = coalesce(usages, 0) + 1, last_used = strftime('%s', 'now')
         WHERE _id = ?1",
        [account_id],
    )?;
    Ok(())
}

pub(crate) fn on_insert(conn: &Connection, new: &Transaction) -> Result<()> {
    if let Some(cat_id) = new.cat_id {
        bump_category(conn, cat_id)?;
    }
    if new.parent_id.is_none() {
        bump_account(conn, new.account_id)?;
    }
    Ok(())
}

pub(crate) fn on_update(conn: &Connection, old: &Transaction, new: &Transaction) -> Result<()> {
    if let Some(cat_id) = new.cat_id {
        if old.cat_id != Some(cat_id) {
            bump_category(conn, cat_id)?;
        }
    }
    // moving into the account the row was a transfer to is not a new use
    if new.parent_id.is_none()
        && new.account_id != old.account_id
        && old.transfer_account != Some(new.account_id)
    {
        bump_account(conn, new.account_id)?;
    }
    Ok(())
}

/// Queue the attachment of a removed row once nothing else points at it.
pub(crate) fn after_delete(conn: &Connection, old: &Transaction) -> Result<()> {
    match &old.picture_uri {
        Some(uri) => release_uri(conn, uri),
        None => Ok(()),
    }
}

pub(crate) fn release_uri(conn: &Connection, uri: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO stale_uris (picture_id)
         SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM transactions WHERE picture_id = ?1)",
        [uri],
    )?;
    Ok(())
}

/// New accounts go to the end of the list.
pub(crate) fn assign_sort_key(conn: &Connection, account_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET sort_key = (SELECT coalesce(max(sort_key), 0) FROM accounts) + 1
         WHERE _id = ?1",
        [account_id],
    )?;
    Ok(())
}

/// Unsynchronized history is discarded when an account leaves sync.
pub(crate) fn on_sync_disabled(conn: &Connection, account_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET sync_sequence_local = 0 WHERE _id = ?1",
        [account_id],
    )?;
    conn.execute("DELETE FROM changes WHERE account_id = ?1", [account_id])?;
    Ok(())
}

/// Drain the queue of attachment URIs no transaction references any more.
pub fn take_stale_uris(conn: &Connection) -> Result<Vec<String>> {
    atomically(conn, "take_stale_uris", |conn| {
        let uris = conn
            .prepare("SELECT DISTINCT picture_id FROM stale_uris WHERE picture_id IS NOT NULL ORDER BY rowid")?
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        conn.execute("DELETE FROM stale_uris", params![])?;
        Ok(uris)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::WriteContext;
    use crate::models::{NewTransaction, TransactionUpdate};
    use crate::settings::Settings;
    use crate::store::Store;
    use crate::transactions::{delete_transaction, insert_transaction, update_transaction};
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

    fn add_categories(conn: &Connection) -> (i64, i64) {
        conn.execute("INSERT INTO categories (label) VALUES ('Food')", []).unwrap();
        let parent = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO categories (label, parent_id) VALUES ('Groceries', ?1)",
            [parent],
        )
        .unwrap();
        (parent, conn.last_insert_rowid())
    }

    fn usages(conn: &Connection, table: &str, id: i64) -> i64 {
        conn.query_row(&format!("SELECT usages FROM {table} WHERE _id = ?1"), [id], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_insert_bumps_category_parent_and_account() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let (parent, child) = add_categories(conn);
        let mut txn = NewTransaction::new(1, -500, Utc::now());
        txn.cat_id = Some(child);
        insert_transaction(conn, WriteContext::LOCAL, &txn).unwrap();
        assert_eq!(usages(conn, "categories", child), 1);
        assert_eq!(usages(conn, "categories", parent), 1);
        assert_eq!(usages(conn, "accounts", 1), 1);
        let last_used: Option<i64> = conn
            .query_row("SELECT last_used FROM categories WHERE _id = ?1", [child], |r| r.get(0))
            .unwrap();
        assert!(last_used.is_some());
    }

    #[test]
    fn test_update_bumps_only_on_category_change() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let (parent, child) = add_categories(conn);
        let mut txn = NewTransaction::new(1, -500, Utc::now());
        txn.cat_id = Some(parent);
        let id = insert_transaction(conn, WriteContext::LOCAL, &txn).unwrap();
        let same = TransactionUpdate {
            cat_id: Some(Some(parent)),
            amount: Some(-600),
            ..Default::default()
        };
        update_transaction(conn, WriteContext::LOCAL, id, &same).unwrap();
        assert_eq!(usages(conn, "categories", parent), 1);
        let other = TransactionUpdate {
            cat_id: Some(Some(child)),
            ..Default::default()
        };
        update_transaction(conn, WriteContext::LOCAL, id, &other).unwrap();
        assert_eq!(usages(conn, "categories", child), 1);
        assert_eq!(usages(conn, "categories", parent), 2);
    }

    #[test]
    fn test_split_category_is_never_counted() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let mut txn = NewTransaction::new(1, -500, Utc::now());
        txn.cat_id = Some(SPLIT_CATID);
        insert_transaction(conn, WriteContext::LOCAL, &txn).unwrap();
        assert_eq!(usages(conn, "categories", SPLIT_CATID), 0);
    }

    #[test]
    fn test_stale_uri_recorded_once_unreferenced() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let mut txn = NewTransaction::new(1, -500, Utc::now());
        txn.picture_uri = Some("file:///p/1.jpg".to_string());
        let first = insert_transaction(conn, WriteContext::LOCAL, &txn).unwrap();
        let second = insert_transaction(conn, WriteContext::LOCAL, &txn).unwrap();

        delete_transaction(conn, WriteContext::LOCAL, first).unwrap();
        assert!(take_stale_uris(conn).unwrap().is_empty());

        delete_transaction(conn, WriteContext::LOCAL, second).unwrap();
        assert_eq!(take_stale_uris(conn).unwrap(), vec!["file:///p/1.jpg".to_string()]);
        assert!(take_stale_uris(conn).unwrap().is_empty());
    }

    #[test]
    fn test_sort_keys_follow_the_maximum() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        conn.execute("UPDATE accounts SET sort_key = 7 WHERE _id = 1", []).unwrap();
        conn.execute("INSERT INTO accounts (label, currency) VALUES ('Bank', 'EUR')", [])
            .unwrap();
        let id = conn.last_insert_rowid();
        assign_sort_key(conn, id).unwrap();
        let key: i64 = conn
            .query_row("SELECT sort_key FROM accounts WHERE _id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(key, 8);
    }
}
