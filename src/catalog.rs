//! Reference data the ledger rows point at: categories, payees and payment methods.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::fmt::normalize;
use crate::models::{AccountType, Category, SPLIT_CATID};

#[derive(Debug, Clone, PartialEq)]
pub struct Payee {
    pub id: i64,
    pub name: String,
    pub name_normalized: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethod {
    pub id: i64,
    pub label: String,
    /// -1 for expenses, 1 for income, 0 for both.
    pub method_type: i64,
    pub is_numbered: bool,
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn insert_category(conn: &Connection, label: &str, parent_id: Option<i64>) -> Result<i64> {
    conn.execute(
        "INSERT INTO categories (label, label_normalized, parent_id) VALUES (?1, ?2, ?3)",
        params![label, normalize(label), parent_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Look a category up by label under `parent_id`, ignoring case and accents.
pub fn find_category(conn: &Connection, label: &str, parent_id: Option<i64>) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT _id FROM categories WHERE label_normalized = ?1 AND parent_id IS ?2",
            params![normalize(label), parent_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// All categories except the reserved split placeholder, parents before children.
pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM categories WHERE _id != ?1
         ORDER BY coalesce(parent_id, _id), parent_id IS NOT NULL, label",
    )?;
    let categories = stmt
        .query_map([SPLIT_CATID], Category::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(categories)
}

// ---------------------------------------------------------------------------
// Payees
// ---------------------------------------------------------------------------

pub fn find_or_create_payee(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT _id FROM payee WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO payee (name, name_normalized) VALUES (?1, ?2)",
        params![name, normalize(name)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Payees whose normalized name contains `query`, normalized the same way.
pub fn search_payees(conn: &Connection, query: &str) -> Result<Vec<Payee>> {
    let pattern = format!("%{}%", normalize(query));
    let mut stmt = conn.prepare(
        "SELECT _id, name, name_normalized FROM payee WHERE name_normalized LIKE ?1 ORDER BY name",
    )?;
    let payees = stmt
        .query_map([pattern], |row| {
            Ok(Payee {
                id: row.get(0)?,
                name: row.get(1)?,
                name_normalized: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(payees)
}

// ---------------------------------------------------------------------------
// Payment methods
// ---------------------------------------------------------------------------

pub fn methods_for_account_type(conn: &Connection, account_type: AccountType) -> Result<Vec<PaymentMethod>> {
    let mut stmt = conn.prepare(
        "SELECT paymentmethods._id, label, paymentmethods.type, is_numbered
         FROM paymentmethods
         JOIN accounttype_paymentmethod ON method_id = paymentmethods._id
         WHERE accounttype_paymentmethod.type = ?1
         ORDER BY label",
    )?;
    let methods = stmt
        .query_map([account_type], |row| {
            Ok(PaymentMethod {
                id: row.get(0)?,
                label: row.get(1)?,
                method_type: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                is_numbered: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(methods)
}
