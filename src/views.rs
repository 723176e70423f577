//! Read API over the store's views.

use std::io::Write;

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::error::Result;
use crate::models::{ChangeRecord, CrStatus, Template, Transaction};

/// A row of `transactions_extended`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedTransaction {
    pub transaction: Transaction,
    pub payee_name: Option<String>,
    pub method_label: Option<String>,
    pub account_label: String,
    pub currency: String,
    pub color: Option<i64>,
    pub exclude_from_totals: bool,
    /// Template the row was created from by a plan, if any.
    pub template_id: Option<i64>,
}

impl ExtendedTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction: Transaction::from_row(row)?,
            payee_name: row.get("name")?,
            method_label: row.get("method_label")?,
            account_label: row.get("account_label")?,
            currency: row.get("currency")?,
            color: row.get("color")?,
            exclude_from_totals: row.get::<_, Option<bool>>("exclude_from_totals")?.unwrap_or(false),
            template_id: row.get("template_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedTemplate {
    pub template: Template,
    pub payee_name: Option<String>,
    pub method_label: Option<String>,
    pub account_label: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedChange {
    pub change: ChangeRecord,
    pub payee_name: Option<String>,
    pub method_label: Option<String>,
}

fn transactions_from(conn: &Connection, view: &str, account_id: i64) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {view} WHERE account_id = ?1 ORDER BY date, _id"
    ))?;
    let rows = stmt
        .query_map([account_id], Transaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn committed_transactions(conn: &Connection, account_id: i64) -> Result<Vec<Transaction>> {
    transactions_from(conn, "transactions_committed", account_id)
}

pub fn uncommitted_transactions(conn: &Connection, account_id: i64) -> Result<Vec<Transaction>> {
    transactions_from(conn, "transactions_uncommitted", account_id)
}

pub fn extended_transactions(conn: &Connection, account_id: i64) -> Result<Vec<ExtendedTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM transactions_extended WHERE account_id = ?1 ORDER BY date, _id",
    )?;
    let rows = stmt
        .query_map([account_id], ExtendedTransaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn templates_extended(conn: &Connection, account_id: i64) -> Result<Vec<ExtendedTemplate>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM templates_extended WHERE account_id = ?1 ORDER BY usages DESC, title",
    )?;
    let rows = stmt
        .query_map([account_id], |row| {
            Ok(ExtendedTemplate {
                template: Template::from_row(row)?,
                payee_name: row.get("name")?,
                method_label: row.get("method_label")?,
                account_label: row.get("account_label")?,
                currency: row.get("currency")?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn extended_change(row: &Row<'_>) -> rusqlite::Result<ExtendedChange> {
    Ok(ExtendedChange {
        change: ChangeRecord::from_row(row)?,
        payee_name: row.get("name")?,
        method_label: row.get("method_label")?,
    })
}

/// `changes_extended` with its joins inlined so rows can be ordered by log position.
const CHANGES_EXTENDED: &str = "SELECT changes.*, payee.name, paymentmethods.label AS method_label
     FROM changes
     LEFT JOIN payee ON changes.payee_id = payee._id
     LEFT JOIN paymentmethods ON changes.method_id = paymentmethods._id";

/// The whole change log of an account, oldest first.
pub fn changes_extended(conn: &Connection, account_id: i64) -> Result<Vec<ExtendedChange>> {
    let mut stmt = conn.prepare(&format!(
        "{CHANGES_EXTENDED} WHERE changes.account_id = ?1 ORDER BY changes.rowid"
    ))?;
    let rows = stmt
        .query_map([account_id], extended_change)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// What the uploader sends for one sequence number, in log order.
pub fn pending_changes(conn: &Connection, account_id: i64, sequence: i64) -> Result<Vec<ExtendedChange>> {
    let mut stmt = conn.prepare(&format!(
        "{CHANGES_EXTENDED} WHERE changes.account_id = ?1 AND changes.sync_sequence_local = ?2
         ORDER BY changes.rowid"
    ))?;
    let rows = stmt
        .query_map(params![account_id, sequence], extended_change)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Serialize)]
struct ChangeCsvRow<'a> {
    #[serde(rename = "type")]
    change_type: &'a str,
    sequence: Option<i64>,
    uuid: &'a str,
    parent_uuid: Option<&'a str>,
    timestamp: Option<i64>,
    comment: Option<&'a str>,
    date: Option<i64>,
    amount: Option<i64>,
    category: Option<i64>,
    payee: Option<&'a str>,
    transfer_account: Option<i64>,
    method: Option<&'a str>,
    cr_status: Option<&'static str>,
    number: Option<&'a str>,
    picture: Option<&'a str>,
}

/// Dump an account's change log as CSV; returns the number of records written.
pub fn export_changes_csv<W: Write>(conn: &Connection, account_id: i64, writer: W) -> Result<usize> {
    let changes = changes_extended(conn, account_id)?;
    let mut wtr = csv::Writer::from_writer(writer);
    for ExtendedChange { change, payee_name, method_label } in &changes {
        wtr.serialize(ChangeCsvRow {
            change_type: change.change_type.as_str(),
            sequence: change.sync_sequence_local,
            uuid: &change.uuid,
            parent_uuid: change.parent_uuid.as_deref(),
            timestamp: change.timestamp,
            comment: change.comment.as_deref(),
            date: change.date,
            amount: change.amount,
            category: change.cat_id,
            payee: payee_name.as_deref(),
            transfer_account: change.transfer_account,
            method: method_label.as_deref(),
            cr_status: change.cr_status.as_ref().map(CrStatus::as_str),
            number: change.reference_number.as_deref(),
            picture: change.picture_uri.as_deref(),
        })?;
    }
    wtr.flush()?;
    Ok(changes.len())
}
