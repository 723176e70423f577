//! Replaying change-sets received from the sync backend.

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::capture::WriteContext;
use crate::error::Result;
use crate::models::{instant_from_secs, ChangeRecord, ChangeType, NewTransaction, TransactionStatus, TransactionUpdate};
use crate::store::atomically;
use crate::transactions::{delete_transaction, insert_transaction, update_transaction};

/// Incoming changes use the same shape as the local change log.
pub type RemoteChange = ChangeRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

fn find_committed(conn: &Connection, account_id: i64, uuid: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT _id FROM transactions WHERE account_id = ?1 AND uuid = ?2 AND status != ?3",
            params![account_id, uuid, TransactionStatus::Uncommitted],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn apply_created(conn: &Connection, change: &RemoteChange) -> Result<bool> {
    if find_committed(conn, change.account_id, &change.uuid)?.is_some() {
        debug!("remote create of {} already applied", change.uuid);
        return Ok(false);
    }
    let date = change.date.map(instant_from_secs).unwrap_or_else(Utc::now);
    let mut txn = NewTransaction::new(change.account_id, change.amount.unwrap_or(0), date);
    txn.comment = change.comment.clone();
    txn.cat_id = change.cat_id;
    txn.payee_id = change.payee_id;
    txn.transfer_account = change.transfer_account;
    txn.method_id = change.method_id;
    txn.reference_number = change.reference_number.clone();
    txn.picture_uri = change.picture_uri.clone();
    txn.uuid = Some(change.uuid.clone());
    if let Some(status) = change.cr_status {
        txn.cr_status = status;
    }
    if let Some(parent_uuid) = &change.parent_uuid {
        txn.parent_id = find_committed(conn, change.account_id, parent_uuid)?;
    }
    // the other half of a transfer may have arrived already
    let peer = match change.transfer_account {
        Some(peer_account) => find_committed(conn, peer_account, &change.uuid)?,
        None => None,
    };
    txn.transfer_peer = peer;
    let id = insert_transaction(conn, WriteContext::REMOTE, &txn)?;
    if let Some(peer) = peer {
        let link = TransactionUpdate {
            transfer_peer: Some(Some(id)),
            ..Default::default()
        };
        update_transaction(conn, WriteContext::REMOTE, peer, &link)?;
    }
    Ok(true)
}

fn apply_updated(conn: &Connection, change: &RemoteChange) -> Result<bool> {
    let Some(id) = find_committed(conn, change.account_id, &change.uuid)? else {
        return Ok(false);
    };
    let patch = TransactionUpdate {
        comment: change.comment.clone().map(Some),
        date: change.date.map(instant_from_secs),
        amount: change.amount,
        cat_id: change.cat_id.map(Some),
        payee_id: change.payee_id.map(Some),
        transfer_account: change.transfer_account.map(Some),
        method_id: change.method_id.map(Some),
        cr_status: change.cr_status,
        reference_number: change.reference_number.clone().map(Some),
        picture_uri: change.picture_uri.clone().map(Some),
        ..Default::default()
    };
    update_transaction(conn, WriteContext::REMOTE, id, &patch)?;
    Ok(true)
}

fn apply_deleted(conn: &Connection, change: &RemoteChange) -> Result<bool> {
    let Some(id) = find_committed(conn, change.account_id, &change.uuid)? else {
        return Ok(false);
    };
    delete_transaction(conn, WriteContext::REMOTE, id)?;
    Ok(true)
}

/// Apply a batch of remote changes as one unit; nothing is logged locally.
///
/// Changes naming a uuid the account does not hold are skipped. Any error
/// rolls the whole batch back.
pub fn apply_remote_changes(conn: &Connection, changes: &[RemoteChange]) -> Result<AppliedSummary> {
    atomically(conn, "apply_remote_changes", |conn| {
        let mut summary = AppliedSummary::default();
        for change in changes {
            let applied = match change.change_type {
                ChangeType::Created => apply_created(conn, change)?,
                ChangeType::Updated => apply_updated(conn, change)?,
                ChangeType::Deleted => apply_deleted(conn, change)?,
            };
            match (applied, change.change_type) {
                (false, _) => summary.skipped += 1,
                (true, ChangeType::Created) => summary.created += 1,
                (true, ChangeType::Updated) => summary.updated += 1,
                (true, ChangeType::Deleted) => summary.deleted += 1,
            }
        }
        info!(
            "applied remote changes: {} created, {} updated, {} deleted, {} skipped",
            summary.created, summary.updated, summary.deleted, summary.skipped
        );
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{enable_sync, increment_sync_sequence, insert_account};
    use crate::catalog::insert_category;
    use crate::models::{NewAccount, NewSplit, NewTransfer, SplitPart, Transaction};
    use crate::settings::Settings;
    use crate::store::Store;
    use crate::transactions::{commit_split, insert_split, insert_transfer};
    use chrono::TimeZone;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_string_lossy().to_string(),
            ..Settings::default()
        };
        let store = Store::open(&settings.store_path(), &settings).unwrap();
        (dir, store)
    }

    fn sync(conn: &Connection, account: i64) {
        enable_sync(conn, account, "remote").unwrap();
        increment_sync_sequence(conn, account).unwrap();
    }

    fn log(conn: &Connection) -> Vec<ChangeRecord> {
        conn.prepare("SELECT * FROM changes ORDER BY rowid")
            .unwrap()
            .query_map([], ChangeRecord::from_row)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    /// Committed rows as (uuid, amount, comment, category, date, parent uuid).
    fn state(conn: &Connection) -> Vec<(String, i64, Option<String>, Option<i64>, i64, Option<String>)> {
        let rows: Vec<Transaction> = conn
            .prepare("SELECT * FROM transactions WHERE status != 2 ORDER BY uuid, amount")
            .unwrap()
            .query_map([], Transaction::from_row)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        rows.iter()
            .map(|t| {
                let parent = t.parent_id.map(|p| {
                    rows.iter()
                        .find(|r| r.id == p)
                        .and_then(|r| r.uuid.clone())
                        .unwrap_or_default()
                });
                (
                    t.uuid.clone().unwrap_or_default(),
                    t.amount,
                    t.comment.clone(),
                    t.cat_id,
                    t.date.timestamp(),
                    parent,
                )
            })
            .collect()
    }

    fn date(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_replaying_the_log_reproduces_committed_rows() {
        let (_a, source) = test_store();
        let (_b, target) = test_store();
        let src = source.conn();
        for conn in [src, target.conn()] {
            insert_category(conn, "Food", None).unwrap();
            insert_category(conn, "Rent", None).unwrap();
        }
        sync(src, 1);

        let mut lunch = NewTransaction::new(1, -1250, date(1));
        lunch.cat_id = Some(1);
        lunch.comment = Some("lunch".to_string());
        let lunch = insert_transaction(src, WriteContext::LOCAL, &lunch).unwrap();
        let rent = insert_transaction(src, WriteContext::LOCAL, &NewTransaction::new(1, -90000, date(2))).unwrap();
        let patch = TransactionUpdate {
            amount: Some(-1500),
            cat_id: Some(Some(2)),
            date: Some(date(3)),
            ..Default::default()
        };
        update_transaction(src, WriteContext::LOCAL, lunch, &patch).unwrap();
        delete_transaction(src, WriteContext::LOCAL, rent).unwrap();
        let split = NewSplit {
            account_id: 1,
            date: date(4),
            amount: -300,
            comment: Some("market".to_string()),
            payee_id: None,
            parts: vec![SplitPart::new(-100, Some(1)), SplitPart::new(-200, Some(2))],
            uuid: None,
        };
        let parent = insert_split(src, WriteContext::LOCAL, &split).unwrap();
        commit_split(src, WriteContext::LOCAL, parent).unwrap();

        let summary = apply_remote_changes(target.conn(), &log(src)).unwrap();
        assert_eq!(summary.created, 5);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(state(target.conn()), state(src));
    }

    #[test]
    fn test_applying_remote_changes_logs_nothing() {
        let (_a, source) = test_store();
        let (_b, target) = test_store();
        sync(source.conn(), 1);
        sync(target.conn(), 1);
        insert_transaction(source.conn(), WriteContext::LOCAL, &NewTransaction::new(1, 10, date(1))).unwrap();
        apply_remote_changes(target.conn(), &log(source.conn())).unwrap();
        assert!(log(target.conn()).is_empty());
        let count: i64 = target
            .conn()
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transfer_halves_are_relinked() {
        let (_a, source) = test_store();
        let (_b, target) = test_store();
        let src = source.conn();
        let bank = insert_account(src, &NewAccount::new("Bank", "EUR")).unwrap();
        insert_account(target.conn(), &NewAccount::new("Bank", "EUR")).unwrap();
        sync(src, 1);
        sync(src, bank);
        insert_transfer(src, WriteContext::LOCAL, &NewTransfer::new(1, bank, -400, date(5))).unwrap();

        apply_remote_changes(target.conn(), &log(src)).unwrap();
        let rows: Vec<Transaction> = target
            .conn()
            .prepare("SELECT * FROM transactions ORDER BY account_id")
            .unwrap()
            .query_map([], Transaction::from_row)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transfer_peer, Some(rows[1].id));
        assert_eq!(rows[1].transfer_peer, Some(rows[0].id));
    }

    #[test]
    fn test_unknown_uuids_are_skipped() {
        let (_dir, store) = test_store();
        let changes = vec![ChangeRecord::deletion(1, "nope"), {
            let mut update = ChangeRecord::deletion(1, "nope");
            update.change_type = ChangeType::Updated;
            update.amount = Some(3);
            update
        }];
        let summary = apply_remote_changes(store.conn(), &changes).unwrap();
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_failed_batch_rolls_back_entirely() {
        let (_dir, store) = test_store();
        let mut good = ChangeRecord::deletion(1, "good");
        good.change_type = ChangeType::Created;
        good.amount = Some(5);
        good.date = Some(0);
        let mut bad = good.clone();
        bad.uuid = "bad".to_string();
        bad.account_id = 99;
        let err = apply_remote_changes(store.conn(), &[good, bad]).unwrap_err();
        assert!(err.is_constraint_violation());
        let count: i64 = store
            .conn()
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        // the connection is usable again afterwards
        insert_transaction(store.conn(), WriteContext::LOCAL, &NewTransaction::new(1, 1, date(1))).unwrap();
    }
}
