//! Transaction write API.
//!
//! Each write runs its row event handlers in this order: change capture,
//! usage bookkeeping, attachment bookkeeping.

use std::collections::HashSet;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::bookkeeping;
use crate::capture::{self, WriteContext};
use crate::error::{LedgerError, Result};
use crate::models::{
    NewSplit, NewTransaction, NewTransfer, Transaction, TransactionStatus, TransactionUpdate,
    SPLIT_CATID,
};
use crate::store::atomically;

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Transaction> {
    conn.query_row("SELECT * FROM transactions WHERE _id = ?1", [id], Transaction::from_row)
        .optional()?
        .ok_or(LedgerError::UnknownTransaction(id))
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Give a row stored before uuids existed one, shared with its transfer peer.
fn ensure_uuid(conn: &Connection, row: Transaction) -> Result<Transaction> {
    if row.uuid.is_some() {
        return Ok(row);
    }
    let peer_uuid: Option<String> = match row.transfer_peer {
        Some(peer) => conn
            .query_row("SELECT uuid FROM transactions WHERE _id = ?1", [peer], |r| r.get(0))
            .optional()?
            .flatten(),
        None => None,
    };
    let uuid = peer_uuid.unwrap_or_else(new_uuid);
    conn.execute(
        "UPDATE transactions SET uuid = ?1
         WHERE _id = ?2 OR (_id = ?3 AND uuid IS NULL)",
        params![uuid, row.id, row.transfer_peer],
    )?;
    debug!("assigned uuid {uuid} to transaction {}", row.id);
    Ok(Transaction {
        uuid: Some(uuid),
        ..row
    })
}

pub fn insert_transaction(conn: &Connection, ctx: WriteContext, txn: &NewTransaction) -> Result<i64> {
    atomically(conn, "insert_transaction", |conn| {
        let uuid = txn.uuid.clone().unwrap_or_else(new_uuid);
        conn.execute(
            "INSERT INTO transactions (comment, date, amount, cat_id, account_id, payee_id,
                 transfer_peer, transfer_account, method_id, parent_id, status, cr_status,
                 number, picture_id, uuid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                txn.comment,
                txn.date.timestamp(),
                txn.amount,
                txn.cat_id,
                txn.account_id,
                txn.payee_id,
                txn.transfer_peer,
                txn.transfer_account,
                txn.method_id,
                txn.parent_id,
                txn.status,
                txn.cr_status,
                txn.reference_number,
                txn.picture_uri,
                uuid,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = get_transaction(conn, id)?;
        capture::on_insert(conn, ctx, &row)?;
        bookkeeping::on_insert(conn, &row)?;
        Ok(id)
    })
}

pub fn update_transaction(
    conn: &Connection,
    ctx: WriteContext,
    id: i64,
    patch: &TransactionUpdate,
) -> Result<()> {
    atomically(conn, "update_transaction", |conn| {
        let old = ensure_uuid(conn, get_transaction(conn, id)?)?;
        let next = patch.apply_to(&old);
        conn.execute(
            "UPDATE transactions SET comment = ?1, date = ?2, amount = ?3, cat_id = ?4,
                 account_id = ?5, payee_id = ?6, transfer_peer = ?7, transfer_account = ?8,
                 method_id = ?9, parent_id = ?10, status = ?11, cr_status = ?12, number = ?13,
                 picture_id = ?14
             WHERE _id = ?15",
            params![
                next.comment,
                next.date.timestamp(),
                next.amount,
                next.cat_id,
                next.account_id,
                next.payee_id,
                next.transfer_peer,
                next.transfer_account,
                next.method_id,
                next.parent_id,
                next.status,
                next.cr_status,
                next.reference_number,
                next.picture_uri,
                id,
            ],
        )?;
        let new = get_transaction(conn, id)?;
        capture::on_update(conn, ctx, &old, &new)?;
        bookkeeping::on_update(conn, &old, &new)?;
        Ok(())
    })
}

fn set_status(conn: &Connection, ctx: WriteContext, id: i64, status: TransactionStatus) -> Result<()> {
    let patch = TransactionUpdate {
        status: Some(status),
        ..Default::default()
    };
    update_transaction(conn, ctx, id, &patch)
}

fn children(conn: &Connection, id: i64) -> Result<Vec<i64>> {
    let ids = conn
        .prepare("SELECT _id FROM transactions WHERE parent_id = ?1 ORDER BY _id")?
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Post-order: split parts before their parent, each row before its transfer peer.
fn collect_removals(
    conn: &Connection,
    id: i64,
    seen: &mut HashSet<i64>,
    order: &mut Vec<i64>,
) -> Result<()> {
    if !seen.insert(id) {
        return Ok(());
    }
    for child in children(conn, id)? {
        collect_removals(conn, child, seen, order)?;
    }
    order.push(id);
    let peer: Option<i64> = conn
        .query_row("SELECT transfer_peer FROM transactions WHERE _id = ?1", [id], |row| row.get(0))
        .optional()?
        .flatten();
    if let Some(peer) = peer {
        collect_removals(conn, peer, seen, order)?;
    }
    Ok(())
}

fn remove_row(conn: &Connection, ctx: WriteContext, id: i64) -> Result<()> {
    let old = ensure_uuid(conn, get_transaction(conn, id)?)?;
    capture::on_delete(conn, ctx, &old)?;
    conn.execute("DELETE FROM transactions WHERE _id = ?1", [id])?;
    bookkeeping::after_delete(conn, &old)?;
    Ok(())
}

/// Delete a transaction with its split parts and transfer peers.
///
/// Returns how many rows were removed.
pub fn delete_transaction(conn: &Connection, ctx: WriteContext, id: i64) -> Result<usize> {
    get_transaction(conn, id)?;
    atomically(conn, "delete_transaction", |conn| {
        // transfer halves reference each other until both are gone
        conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        let mut order = Vec::new();
        collect_removals(conn, id, &mut HashSet::new(), &mut order)?;
        for row in &order {
            remove_row(conn, ctx, *row)?;
        }
        debug!("deleted transaction {id} ({} rows)", order.len());
        Ok(order.len())
    })
}

// ---------------------------------------------------------------------------
// Transfers and splits
// ---------------------------------------------------------------------------

fn write_transfer(
    conn: &Connection,
    ctx: WriteContext,
    first: NewTransaction,
    peer_account: i64,
) -> Result<(i64, i64)> {
    let from = insert_transaction(conn, ctx, &first)?;
    let mut second = first.clone();
    second.account_id = peer_account;
    second.amount = -first.amount;
    second.transfer_account = Some(first.account_id);
    second.transfer_peer = Some(from);
    second.method_id = None;
    second.parent_id = None;
    second.picture_uri = None;
    let to = insert_transaction(conn, ctx, &second)?;
    let link = TransactionUpdate {
        transfer_peer: Some(Some(to)),
        ..Default::default()
    };
    update_transaction(conn, ctx, from, &link)?;
    Ok((from, to))
}

/// Write both halves of a transfer under one uuid.
///
/// The first half is inserted, then its peer pointing back at it, then the
/// first half is linked to the peer.
pub fn insert_transfer(conn: &Connection, ctx: WriteContext, transfer: &NewTransfer) -> Result<(i64, i64)> {
    atomically(conn, "insert_transfer", |conn| {
        let mut first = NewTransaction::new(transfer.account_id, transfer.amount, transfer.date);
        first.transfer_account = Some(transfer.transfer_account);
        first.comment = transfer.comment.clone();
        first.payee_id = transfer.payee_id;
        first.method_id = transfer.method_id;
        first.cr_status = transfer.cr_status;
        first.uuid = Some(transfer.uuid.clone().unwrap_or_else(new_uuid));
        write_transfer(conn, ctx, first, transfer.transfer_account)
    })
}

/// Write a split parent and its parts, all uncommitted.
pub fn insert_split(conn: &Connection, ctx: WriteContext, split: &NewSplit) -> Result<i64> {
    atomically(conn, "insert_split", |conn| {
        let mut parent = NewTransaction::new(split.account_id, split.amount, split.date);
        parent.comment = split.comment.clone();
        parent.payee_id = split.payee_id;
        parent.cat_id = Some(SPLIT_CATID);
        parent.status = TransactionStatus::Uncommitted;
        parent.uuid = split.uuid.clone();
        let parent_id = insert_transaction(conn, ctx, &parent)?;

        for part in &split.parts {
            let mut row = NewTransaction::new(split.account_id, part.amount, split.date);
            row.comment = part.comment.clone();
            row.payee_id = split.payee_id;
            row.parent_id = Some(parent_id);
            row.status = TransactionStatus::Uncommitted;
            match part.transfer_account {
                Some(peer_account) => {
                    row.transfer_account = Some(peer_account);
                    row.uuid = Some(new_uuid());
                    write_transfer(conn, ctx, row, peer_account)?;
                }
                None => {
                    row.cat_id = part.cat_id;
                    insert_transaction(conn, ctx, &row)?;
                }
            }
        }
        Ok(parent_id)
    })
}

/// Finalize a split: parent first, then the parts in id order, each part's
/// transfer peer right after it.
pub fn commit_split(conn: &Connection, ctx: WriteContext, parent_id: i64) -> Result<()> {
    atomically(conn, "commit_split", |conn| {
        let parent = get_transaction(conn, parent_id)?;
        let parts = children(conn, parent_id)?;
        if !parts.is_empty() {
            let total: i64 = conn.query_row(
                "SELECT coalesce(sum(amount), 0) FROM transactions WHERE parent_id = ?1",
                [parent_id],
                |row| row.get(0),
            )?;
            if total != parent.amount {
                return Err(LedgerError::UnbalancedSplit {
                    expected: parent.amount,
                    actual: total,
                });
            }
        }
        if parent.status.is_uncommitted() {
            set_status(conn, ctx, parent_id, TransactionStatus::Normal)?;
        }
        for part_id in parts {
            let part = get_transaction(conn, part_id)?;
            if part.status.is_uncommitted() {
                set_status(conn, ctx, part_id, TransactionStatus::Normal)?;
            }
            if let Some(peer) = part.transfer_peer {
                if get_transaction(conn, peer)?.status.is_uncommitted() {
                    set_status(conn, ctx, peer, TransactionStatus::Normal)?;
                }
            }
        }
        Ok(())
    })
}

/// Drop every row left uncommitted by an abandoned split edit.
pub fn discard_uncommitted(conn: &Connection, ctx: WriteContext) -> Result<usize> {
    atomically(conn, "discard_uncommitted", |conn| {
        conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        // parts were written after their parent, so newest first is post-order
        let ids = conn
            .prepare("SELECT _id FROM transactions WHERE status = ?1 ORDER BY _id DESC")?
            .query_map([TransactionStatus::Uncommitted], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        for id in &ids {
            remove_row(conn, ctx, *id)?;
        }
        Ok(ids.len())
    })
}
