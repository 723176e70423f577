//! Change capture for transaction writes.
//!
//! Every write in `transactions` hands the before/after rows to the handlers
//! here, inside the same savepoint as the write itself, so a rolled back
//! write takes its change records with it.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{LedgerError, Result};
use crate::models::{ChangeRecord, ChangeType, Transaction};

/// Per-call write options threaded through the write API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteContext {
    /// Set while an incoming remote change-set is being replayed; nothing is logged.
    pub applying_remote_changes: bool,
}

impl WriteContext {
    pub const LOCAL: Self = Self {
        applying_remote_changes: false,
    };
    pub const REMOTE: Self = Self {
        applying_remote_changes: true,
    };
}

/// Whether a row event on `account_id` must reach the change log.
///
/// The account has to exist, be linked to a sync backend and have a non-zero
/// local sequence. A row in `_sync_state` suppresses logging the same way a
/// remote write context does.
pub fn should_log(conn: &Connection, ctx: WriteContext, account_id: i64) -> Result<bool> {
    if ctx.applying_remote_changes {
        return Ok(false);
    }
    let account: Option<(Option<String>, Option<i64>)> = conn
        .query_row(
            "SELECT sync_account_name, sync_sequence_local FROM accounts WHERE _id = ?1",
            [account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((sync_account_name, sequence)) = account else {
        return Ok(false);
    };
    if sync_account_name.is_none() || sequence.unwrap_or(0) <= 0 {
        return Ok(false);
    }
    let replaying: bool =
        conn.query_row("SELECT EXISTS (SELECT 1 FROM _sync_state)", [], |row| row.get(0))?;
    Ok(!replaying)
}

fn current_sequence(conn: &Connection, account_id: i64) -> Result<Option<i64>> {
    let sequence = conn
        .query_row(
            "SELECT sync_sequence_local FROM accounts WHERE _id = ?1",
            [account_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sequence.flatten())
}

fn parent_uuid(conn: &Connection, parent_id: Option<i64>) -> Result<Option<String>> {
    let Some(parent_id) = parent_id else {
        return Ok(None);
    };
    let uuid = conn
        .query_row(
            "SELECT uuid FROM transactions WHERE _id = ?1",
            [parent_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(uuid.flatten())
}

/// The write layer assigns uuids before any event reaches here; a row
/// without one cannot be logged and fails the write.
fn row_uuid(row: &Transaction) -> Result<&str> {
    row.uuid
        .as_deref()
        .ok_or_else(|| LedgerError::Other(format!("transaction {} has no uuid", row.id)))
}

fn created(conn: &Connection, row: &Transaction) -> Result<ChangeRecord> {
    let uuid = row_uuid(row)?;
    Ok(ChangeRecord {
        account_id: row.account_id,
        change_type: ChangeType::Created,
        sync_sequence_local: current_sequence(conn, row.account_id)?,
        uuid: uuid.to_string(),
        timestamp: None,
        parent_uuid: parent_uuid(conn, row.parent_id)?,
        comment: row.comment.clone(),
        date: Some(row.date.timestamp()),
        amount: Some(row.amount),
        cat_id: row.cat_id,
        payee_id: row.payee_id,
        transfer_account: row.transfer_account,
        method_id: row.method_id,
        cr_status: Some(row.cr_status),
        reference_number: row.reference_number.clone(),
        picture_uri: row.picture_uri.clone(),
    })
}

fn deleted(conn: &Connection, row: &Transaction) -> Result<ChangeRecord> {
    let uuid = row_uuid(row)?;
    let mut record = ChangeRecord::deletion(row.account_id, uuid);
    record.sync_sequence_local = current_sequence(conn, row.account_id)?;
    record.parent_uuid = parent_uuid(conn, row.parent_id)?;
    Ok(record)
}

fn delta<T: PartialEq + Clone>(old: &Option<T>, new: &Option<T>) -> Option<T> {
    if old == new {
        None
    } else {
        new.clone()
    }
}

fn updated(conn: &Connection, old: &Transaction, new: &Transaction) -> Result<ChangeRecord> {
    let uuid = row_uuid(new)?;
    Ok(ChangeRecord {
        account_id: new.account_id,
        change_type: ChangeType::Updated,
        sync_sequence_local: current_sequence(conn, old.account_id)?,
        uuid: uuid.to_string(),
        timestamp: None,
        parent_uuid: parent_uuid(conn, new.parent_id)?,
        comment: delta(&old.comment, &new.comment),
        date: delta(&Some(old.date.timestamp()), &Some(new.date.timestamp())),
        amount: delta(&Some(old.amount), &Some(new.amount)),
        cat_id: delta(&old.cat_id, &new.cat_id),
        payee_id: delta(&old.payee_id, &new.payee_id),
        transfer_account: delta(&old.transfer_account, &new.transfer_account),
        method_id: delta(&old.method_id, &new.method_id),
        cr_status: delta(&Some(old.cr_status), &Some(new.cr_status)),
        reference_number: delta(&old.reference_number, &new.reference_number),
        picture_uri: delta(&old.picture_uri, &new.picture_uri),
    })
}

pub(crate) fn append(conn: &Connection, record: &ChangeRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO changes (account_id, type, sync_sequence_local, uuid, parent_uuid,
             comment, date, amount, cat_id, payee_id, transfer_account, method_id,
             cr_status, number, picture_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            record.account_id,
            record.change_type,
            record.sync_sequence_local,
            record.uuid,
            record.parent_uuid,
            record.comment,
            record.date,
            record.amount,
            record.cat_id,
            record.payee_id,
            record.transfer_account,
            record.method_id,
            record.cr_status,
            record.reference_number,
            record.picture_uri,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row events
// ---------------------------------------------------------------------------

pub(crate) fn on_insert(conn: &Connection, ctx: WriteContext, new: &Transaction) -> Result<()> {
    if new.status.is_uncommitted() || !should_log(conn, ctx, new.account_id)? {
        return Ok(());
    }
    append(conn, &created(conn, new)?)
}

/// Three independent checks, in this order: the row appearing in an account
/// (finalized or moved in), the row leaving its old account, and a plain edit.
pub(crate) fn on_update(
    conn: &Connection,
    ctx: WriteContext,
    old: &Transaction,
    new: &Transaction,
) -> Result<()> {
    let finalized = old.status.is_uncommitted() && !new.status.is_uncommitted();
    let moved = old.account_id != new.account_id;

    if (finalized || (moved && !new.status.is_uncommitted()))
        && should_log(conn, ctx, new.account_id)?
    {
        append(conn, &created(conn, new)?)?;
    }

    if moved && !new.status.is_uncommitted() && should_log(conn, ctx, old.account_id)? {
        append(conn, &deleted(conn, old)?)?;
    }

    // a changed peer is the linking half of a transfer write, not an edit
    if !old.status.is_uncommitted()
        && !new.status.is_uncommitted()
        && !moved
        && old.transfer_peer == new.transfer_peer
        && should_log(conn, ctx, old.account_id)?
    {
        append(conn, &updated(conn, old, new)?)?;
    }
    Ok(())
}

/// Called before the row is removed, so the parent can still be resolved.
pub(crate) fn on_delete(conn: &Connection, ctx: WriteContext, old: &Transaction) -> Result<()> {
    if old.status.is_uncommitted() || !should_log(conn, ctx, old.account_id)? {
        return Ok(());
    }
    append(conn, &deleted(conn, old)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::store::Store;

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
    fn test_unsynced_account_is_not_logged() {
        let (_dir, store) = test_store();
        assert!(!should_log(store.conn(), WriteContext::LOCAL, 1).unwrap());
    }

    #[test]
    fn test_synced_account_needs_a_sequence() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        conn.execute("UPDATE accounts SET sync_account_name = 'remote' WHERE _id = 1", [])
            .unwrap();
        assert!(!should_log(conn, WriteContext::LOCAL, 1).unwrap());
        conn.execute("UPDATE accounts SET sync_sequence_local = 1 WHERE _id = 1", [])
            .unwrap();
        assert!(should_log(conn, WriteContext::LOCAL, 1).unwrap());
    }

    #[test]
    fn test_remote_context_and_marker_suppress_logging() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        conn.execute(
            "UPDATE accounts SET sync_account_name = 'remote', sync_sequence_local = 3 WHERE _id = 1",
            [],
        )
        .unwrap();
        assert!(!should_log(conn, WriteContext::REMOTE, 1).unwrap());
        conn.execute("INSERT INTO _sync_state (status) VALUES (1)", []).unwrap();
        assert!(!should_log(conn, WriteContext::LOCAL, 1).unwrap());
        conn.execute("DELETE FROM _sync_state", []).unwrap();
        assert!(should_log(conn, WriteContext::LOCAL, 1).unwrap());
    }

    #[test]
    fn test_missing_account_is_not_logged() {
        let (_dir, store) = test_store();
        assert!(!should_log(store.conn(), WriteContext::LOCAL, 999).unwrap());
    }

    #[test]
    fn test_delta_keeps_only_changed_values() {
        assert_eq!(delta(&Some(1), &Some(1)), None);
        assert_eq!(delta(&Some(1), &Some(2)), Some(2));
        assert_eq!(delta(&None, &Some("x")), Some("x"));
        // clearing a field cannot be told apart from leaving it alone
        assert_eq!(delta(&Some("x"), &None), None);
    }
}
