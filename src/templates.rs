use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::capture::WriteContext;
use crate::error::{LedgerError, Result};
use crate::models::{NewTemplate, NewTransaction, NewTransfer, Template};
use crate::store::atomically;
use crate::transactions::{insert_transaction, insert_transfer};

pub fn insert_template(conn: &Connection, template: &NewTemplate) -> Result<i64> {
    let uuid = template
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO templates (title, comment, amount, cat_id, account_id, payee_id, transfer_peer,
             transfer_account, method_id, plan_id, plan_execution, uuid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            template.title,
            template.comment,
            template.amount,
            template.cat_id,
            template.account_id,
            template.payee_id,
            template.transfer_account.is_some(),
            template.transfer_account,
            template.method_id,
            template.plan_id,
            template.plan_execution_automatic,
            uuid,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Replace every user-editable field; usage statistics and uuid stay.
pub fn update_template(conn: &Connection, id: i64, template: &NewTemplate) -> Result<()> {
    let changed = conn.execute(
        "UPDATE templates SET title = ?1, comment = ?2, amount = ?3, cat_id = ?4, account_id = ?5,
             payee_id = ?6, transfer_peer = ?7, transfer_account = ?8, method_id = ?9,
             plan_id = ?10, plan_execution = ?11
         WHERE _id = ?12",
        params![
            template.title,
            template.comment,
            template.amount,
            template.cat_id,
            template.account_id,
            template.payee_id,
            template.transfer_account.is_some(),
            template.transfer_account,
            template.method_id,
            template.plan_id,
            template.plan_execution_automatic,
            id,
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::UnknownTemplate(id));
    }
    Ok(())
}

pub fn delete_template(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM templates WHERE _id = ?1", [id])?;
    if changed == 0 {
        return Err(LedgerError::UnknownTemplate(id));
    }
    Ok(())
}

pub fn get_template(conn: &Connection, id: i64) -> Result<Template> {
    conn.query_row("SELECT * FROM templates WHERE _id = ?1", [id], Template::from_row)
        .optional()?
        .ok_or(LedgerError::UnknownTemplate(id))
}

/// Most used first.
pub fn list_templates(conn: &Connection, account_id: Option<i64>) -> Result<Vec<Template>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM templates WHERE ?1 IS NULL OR account_id = ?1
         ORDER BY usages DESC, title",
    )?;
    let templates = stmt
        .query_map([account_id], Template::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(templates)
}

/// The template behind `plan_id`, unless `instance_id` has already been dealt with.
pub fn template_for_open_instance(
    conn: &Connection,
    plan_id: i64,
    instance_id: i64,
) -> Result<Option<Template>> {
    let template = conn
        .query_row(
            "SELECT * FROM templates WHERE plan_id = ?1
             AND NOT EXISTS (SELECT 1 FROM planinstance_transaction WHERE instance_id = ?2)",
            params![plan_id, instance_id],
            Template::from_row,
        )
        .optional()?;
    Ok(template)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Saved(i64),
    SaveFailed(String),
}

fn materialize(conn: &Connection, template: &Template, date: DateTime<Utc>) -> Result<i64> {
    match template.transfer_account {
        Some(peer_account) => {
            let mut transfer = NewTransfer::new(template.account_id, peer_account, template.amount, date);
            transfer.comment = template.comment.clone();
            transfer.payee_id = template.payee_id;
            transfer.method_id = template.method_id;
            let (from, _) = insert_transfer(conn, WriteContext::LOCAL, &transfer)?;
            Ok(from)
        }
        None => {
            let mut txn = NewTransaction::new(template.account_id, template.amount, date);
            txn.comment = template.comment.clone();
            txn.cat_id = template.cat_id;
            txn.payee_id = template.payee_id;
            txn.method_id = template.method_id;
            insert_transaction(conn, WriteContext::LOCAL, &txn)
        }
    }
}

/// Turn a template into a transaction dated `date` and tie it to the plan
/// instance it was created for.
///
/// A write that fails leaves nothing behind and is reported as
/// `SaveFailed`; only an unknown template is an error.
pub fn apply_template(
    conn: &Connection,
    template_id: i64,
    instance_id: i64,
    date: DateTime<Utc>,
) -> Result<ApplyOutcome> {
    let template = get_template(conn, template_id)?;
    let saved = atomically(conn, "apply_template", |conn| {
        let id = materialize(conn, &template, date)?;
        conn.execute(
            "INSERT INTO planinstance_transaction (template_id, instance_id, transaction_id)
             VALUES (?1, ?2, ?3)",
            params![template_id, instance_id, id],
        )?;
        conn.execute(
            "UPDATE templates SET usages = coalesce(usages, 0) + 1, last_used = strftime('%s', 'now')
             WHERE _id = ?1",
            [template_id],
        )?;
        Ok(id)
    });
    match saved {
        Ok(id) => {
            info!("applied template {template_id} for instance {instance_id} as transaction {id}");
            Ok(ApplyOutcome::Saved(id))
        }
        Err(e) => {
            warn!("could not apply template {template_id} for instance {instance_id}: {e}");
            Ok(ApplyOutcome::SaveFailed(e.to_string()))
        }
    }
}

/// Mark an instance as dealt with without creating a transaction.
pub fn cancel_instance(conn: &Connection, template_id: i64, instance_id: i64) -> Result<()> {
    get_template(conn, template_id)?;
    conn.execute(
        "INSERT INTO planinstance_transaction (template_id, instance_id, transaction_id)
         VALUES (?1, ?2, NULL)",
        params![template_id, instance_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::insert_account;
    use crate::catalog::insert_category;
    use crate::models::NewAccount;
    use crate::settings::Settings;
    use crate::store::Store;
    use crate::transactions::get_transaction;
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

    fn planned(conn: &Connection, title: &str, plan_id: i64) -> i64 {
        let mut template = NewTemplate::new(title, 1, -90000);
        template.plan_id = Some(plan_id);
        template.plan_execution_automatic = true;
        insert_template(conn, &template).unwrap()
    }

    #[test]
    fn test_template_crud() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let id = planned(conn, "Rent", 7);
        let template = get_template(conn, id).unwrap();
        assert_eq!(template.title, "Rent");
        assert_eq!(template.plan_id, Some(7));
        assert!(template.plan_execution_automatic);
        assert!(template.uuid.is_some());
        assert!(!template.is_transfer);

        let mut edited = NewTemplate::new("Rent (flat)", 1, -95000);
        edited.comment = Some("monthly".to_string());
        update_template(conn, id, &edited).unwrap();
        let template = get_template(conn, id).unwrap();
        assert_eq!(template.amount, -95000);
        assert_eq!(template.plan_id, None);

        assert_eq!(list_templates(conn, Some(1)).unwrap().len(), 1);
        assert!(list_templates(conn, Some(2)).unwrap().is_empty());
        delete_template(conn, id).unwrap();
        assert!(matches!(get_template(conn, id), Err(LedgerError::UnknownTemplate(_))));
        assert!(update_template(conn, id, &edited).is_err());
    }

    #[test]
    fn test_apply_links_instance_and_counts_usage() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let id = planned(conn, "Rent", 7);
        let when = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        assert!(template_for_open_instance(conn, 7, 100).unwrap().is_some());

        let outcome = apply_template(conn, id, 100, when).unwrap();
        let ApplyOutcome::Saved(txn_id) = outcome.clone() else {
            panic!("expected a saved transaction, got {outcome:?}");
        };
        let txn = get_transaction(conn, txn_id).unwrap();
        assert_eq!(txn.amount, -90000);
        assert_eq!(txn.date, when);
        assert_eq!(get_template(conn, id).unwrap().usages, 1);
        assert!(template_for_open_instance(conn, 7, 100).unwrap().is_none());
        assert!(template_for_open_instance(conn, 7, 101).unwrap().is_some());
    }

    #[test]
    fn test_transfer_template_creates_both_halves() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let savings = insert_account(conn, &NewAccount::new("Savings", "EUR")).unwrap();
        let mut template = NewTemplate::new("Save", 1, -5000);
        template.transfer_account = Some(savings);
        let id = insert_template(conn, &template).unwrap();
        assert!(get_template(conn, id).unwrap().is_transfer);

        let when = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let ApplyOutcome::Saved(txn_id) = apply_template(conn, id, 5, when).unwrap() else {
            panic!("transfer template was not saved");
        };
        let peer = get_transaction(conn, txn_id).unwrap().transfer_peer.unwrap();
        assert_eq!(get_transaction(conn, peer).unwrap().amount, 5000);
    }

    #[test]
    fn test_failed_apply_is_reported_and_leaves_nothing() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let cat = insert_category(conn, "Housing", None).unwrap();
        let mut template = NewTemplate::new("Rent", 1, -90000);
        template.cat_id = Some(cat);
        let id = insert_template(conn, &template).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        conn.execute("DELETE FROM categories WHERE _id = ?1", [cat]).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

        let outcome = apply_template(conn, id, 1, Utc::now()).unwrap();
        assert!(matches!(outcome, ApplyOutcome::SaveFailed(_)));
        let links: i64 = conn
            .query_row("SELECT count(*) FROM planinstance_transaction", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 0);
        assert_eq!(get_template(conn, id).unwrap().usages, 0);
    }

    #[test]
    fn test_cancelled_instance_is_closed() {
        let (_dir, store) = test_store();
        let conn = store.conn();
        let id = planned(conn, "Rent", 7);
        cancel_instance(conn, id, 55).unwrap();
        assert!(template_for_open_instance(conn, 7, 55).unwrap().is_none());
        let transactions: i64 = conn
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(transactions, 0);
        assert!(cancel_instance(conn, 999, 56).is_err());
    }
}
