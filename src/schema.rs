use log::info;
use rusqlite::{params, Connection};

use crate::accounts::insert_account;
use crate::currencies::CURRENCY_CODES;
use crate::error::Result;
use crate::models::{AccountType, NewAccount, SPLIT_CATEGORY_LABEL, SPLIT_CATID};
use crate::settings::Settings;

/// On-disk format written by this crate.
pub const DATABASE_VERSION: u32 = 63;

/// Oldest stored version the migration chain knows how to lift.
pub const OLDEST_UPGRADABLE_VERSION: u32 = 16;

// Tables in dependency order. Transfer halves point at each other and split
// parts at their parent, so `transactions` references itself.
pub const TABLES: &str = "
CREATE TABLE payee (
    _id integer primary key autoincrement,
    name text UNIQUE not null,
    name_normalized text
);

CREATE TABLE paymentmethods (
    _id integer primary key autoincrement,
    label text not null,
    is_numbered boolean default 0,
    type integer check (type in (-1,0,1)) default 0
);

CREATE TABLE categories (
    _id integer primary key autoincrement,
    label text not null,
    label_normalized text,
    parent_id integer references categories(_id),
    usages integer default 0,
    last_used datetime,
    UNIQUE (label,parent_id)
);

CREATE TABLE accounts (
    _id integer primary key autoincrement,
    label text not null,
    opening_balance integer,
    description text,
    currency text not null,
    type text not null check (type in ('CASH','BANK','CCARD','ASSET','LIABILITY')) default 'CASH',
    color integer default -3355444,
    grouping text not null check (grouping in ('NONE','DAY','WEEK','MONTH','YEAR')) default 'NONE',
    usages integer default 0,
    last_used datetime,
    sort_key integer,
    sync_account_name text,
    sync_sequence_local integer default 0,
    exclude_from_totals boolean default 0,
    uuid text
);

CREATE TABLE accounttype_paymentmethod (
    type text not null check (type in ('CASH','BANK','CCARD','ASSET','LIABILITY')),
    method_id integer references paymentmethods (_id),
    primary key (type,method_id)
);

CREATE TABLE transactions (
    _id integer primary key autoincrement,
    comment text,
    date datetime not null,
    amount integer not null,
    cat_id integer references categories(_id),
    account_id integer not null references accounts(_id) ON DELETE CASCADE,
    payee_id integer references payee(_id),
    transfer_peer integer references transactions(_id),
    transfer_account integer references accounts(_id),
    method_id integer references paymentmethods(_id),
    parent_id integer references transactions(_id) ON DELETE CASCADE,
    status integer default 0,
    cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED','VOID')) default 'RECONCILED',
    number text,
    picture_id text,
    uuid text
);

CREATE TABLE templates (
    _id integer primary key autoincrement,
    comment text,
    amount integer not null,
    cat_id integer references categories(_id),
    account_id integer not null references accounts(_id) ON DELETE CASCADE,
    payee_id integer references payee(_id),
    transfer_peer boolean default 0,
    transfer_account integer references accounts(_id) ON DELETE CASCADE,
    method_id integer references paymentmethods(_id),
    title text not null,
    usages integer default 0,
    plan_id integer,
    plan_execution boolean default 0,
    uuid text,
    last_used datetime
);

CREATE TABLE planinstance_transaction (
    template_id integer references templates(_id) ON DELETE CASCADE,
    instance_id integer,
    transaction_id integer references transactions(_id) ON DELETE CASCADE,
    primary key (instance_id,transaction_id)
);

CREATE TABLE currency (
    _id integer primary key autoincrement,
    code text UNIQUE not null
);

CREATE TABLE changes (
    account_id integer not null references accounts(_id) ON DELETE CASCADE,
    type text not null check (type in ('created','updated','deleted')),
    sync_sequence_local integer,
    uuid text not null,
    timestamp datetime DEFAULT (strftime('%s','now')),
    parent_uuid text,
    comment text,
    date datetime,
    amount integer,
    cat_id integer references categories(_id) ON DELETE SET NULL,
    payee_id integer references payee(_id) ON DELETE SET NULL,
    transfer_account integer references accounts(_id) ON DELETE SET NULL,
    method_id integer references paymentmethods(_id),
    cr_status text check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED','VOID')),
    number text,
    picture_id text
);

CREATE TABLE _sync_state (status integer);

CREATE TABLE event_cache (
    title TEXT,
    description TEXT,
    dtstart INTEGER,
    dtend INTEGER,
    eventTimezone TEXT,
    duration TEXT,
    allDay INTEGER NOT NULL DEFAULT 0,
    rrule TEXT,
    customAppPackage TEXT,
    customAppUri TEXT
);

CREATE TABLE stale_uris (picture_id text);
";

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

pub const VIEW_COMMITTED: &str = "CREATE VIEW transactions_committed AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status != 2";

pub const VIEW_UNCOMMITTED: &str = "CREATE VIEW transactions_uncommitted AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status = 2";

pub const VIEW_ALL: &str = "CREATE VIEW transactions_all AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id";

pub const VIEW_TEMPLATES: &str = "CREATE VIEW templates_all AS SELECT templates.*, payee.name, paymentmethods.label AS method_label FROM templates LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id";

pub const VIEW_EXTENDED: &str = "CREATE VIEW transactions_extended AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, color, currency, exclude_from_totals, accounts.label AS account_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN accounts ON account_id = accounts._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status != 2";

pub const VIEW_TEMPLATES_EXTENDED: &str = "CREATE VIEW templates_extended AS SELECT templates.*, payee.name, paymentmethods.label AS method_label, color, currency, exclude_from_totals, accounts.label AS account_label FROM templates LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN accounts ON account_id = accounts._id";

pub const VIEW_CHANGES_EXTENDED: &str = "CREATE VIEW changes_extended AS SELECT changes.*, payee.name, paymentmethods.label AS method_label FROM changes LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id";

pub const VIEWS: &[&str] = &[
    VIEW_COMMITTED,
    VIEW_UNCOMMITTED,
    VIEW_ALL,
    VIEW_TEMPLATES,
    VIEW_EXTENDED,
    VIEW_TEMPLATES_EXTENDED,
    VIEW_CHANGES_EXTENDED,
];

pub const INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX transactions_account_uuid ON transactions(account_id,uuid,status)",
    "CREATE UNIQUE INDEX accounts_uuid ON accounts(uuid)",
    "CREATE INDEX transactions_cat_id_index on transactions(cat_id)",
    "CREATE INDEX templates_cat_id_index on templates(cat_id)",
];

// (label, type, is_numbered); all of them are offered for bank accounts only
pub const DEFAULT_PAYMENT_METHODS: &[(&str, i64, bool)] = &[
    ("CHEQUE", -1, true),
    ("CREDITCARD", -1, false),
    ("DEPOSIT", 1, false),
    ("DIRECTDEBIT", -1, false),
];

/// Build the full current layout on an empty database and seed it.
///
/// Runs inside one transaction; on failure nothing is left behind and
/// `user_version` stays 0.
pub fn create_schema(conn: &Connection, settings: &Settings) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(TABLES)?;
    for view in VIEWS {
        tx.execute_batch(view)?;
    }
    for index in INDEXES {
        tx.execute_batch(index)?;
    }
    seed(&tx, settings)?;
    tx.pragma_update(None, "user_version", DATABASE_VERSION)?;
    tx.commit()?;
    info!("created store at version {DATABASE_VERSION}");
    Ok(())
}

fn seed(conn: &Connection, settings: &Settings) -> Result<()> {
    let mut account = NewAccount::new(&settings.default_account_label, &settings.local_currency);
    account.description = Some(settings.default_account_description.clone());
    insert_account(conn, &account)?;

    for (label, method_type, numbered) in DEFAULT_PAYMENT_METHODS {
        conn.execute(
            "INSERT INTO paymentmethods (label, type, is_numbered) VALUES (?1, ?2, ?3)",
            params![label, method_type, numbered],
        )?;
        conn.execute(
            "INSERT INTO accounttype_paymentmethod (type, method_id) VALUES (?1, ?2)",
            params![AccountType::Bank, conn.last_insert_rowid()],
        )?;
    }

    let mut insert_currency = conn.prepare("INSERT INTO currency (code) VALUES (?1)")?;
    for code in CURRENCY_CODES {
        insert_currency.execute([code])?;
    }

    // split parents need a category row to satisfy the foreign key
    conn.execute(
        "INSERT INTO categories (_id, parent_id, label) VALUES (?1, ?1, ?2)",
        params![SPLIT_CATID, SPLIT_CATEGORY_LABEL],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Comparable description of a store's layout, row data excluded.
///
/// Column order is not part of it: columns added by `ALTER TABLE` land at the
/// end of a table, so an upgraded store cannot match a fresh one positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    /// (table, sorted column descriptions, sorted foreign keys)
    pub tables: Vec<(String, Vec<String>, Vec<String>)>,
    /// (name, sql) with whitespace collapsed
    pub views: Vec<(String, String)>,
    /// (table, index name, unique, columns)
    pub indexes: Vec<(String, String, bool, String)>,
    pub triggers: Vec<String>,
}

pub fn snapshot(conn: &Connection) -> Result<SchemaSnapshot> {
    let names = |kind: &str| -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt
            .query_map([kind], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    };

    let mut tables = Vec::new();
    for table in names("table")? {
        let mut columns = conn
            .prepare(&format!("PRAGMA table_info('{table}')"))?
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let decl: String = row.get(2)?;
                let notnull: bool = row.get(3)?;
                let default: Option<String> = row.get(4)?;
                let pk: i64 = row.get(5)?;
                Ok(format!(
                    "{name} {} notnull={notnull} default={} pk={pk}",
                    decl.to_lowercase(),
                    default.unwrap_or_default()
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        columns.sort();
        let mut foreign_keys = conn
            .prepare(&format!("PRAGMA foreign_key_list('{table}')"))?
            .query_map([], |row| {
                let target: String = row.get(2)?;
                let from: String = row.get(3)?;
                let to: Option<String> = row.get(4)?;
                let on_delete: String = row.get(6)?;
                Ok(format!("{from}->{target}({}) {on_delete}", to.unwrap_or_default()))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        foreign_keys.sort();
        tables.push((table, columns, foreign_keys));
    }

    let mut views = Vec::new();
    for view in names("view")? {
        let sql: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = ?1",
            [&view],
            |row| row.get(0),
        )?;
        views.push((view, sql.split_whitespace().collect::<Vec<_>>().join(" ")));
    }

    let mut indexes = Vec::new();
    for (table, _, _) in &tables {
        let list: Vec<(String, bool)> = conn
            .prepare(&format!("PRAGMA index_list('{table}')"))?
            .query_map([], |row| Ok((row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (name, unique) in list {
            // autoindex names carry the table name they were created under
            let label = if name.starts_with("sqlite_autoindex_") {
                "autoindex".to_string()
            } else {
                name.clone()
            };
            let columns: Vec<String> = conn
                .prepare(&format!("PRAGMA index_info('{name}')"))?
                .query_map([], |row| row.get::<_, Option<String>>(2))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect();
            indexes.push((table.clone(), label, unique, columns.join(",")));
        }
    }
    indexes.sort();

    Ok(SchemaSnapshot {
        tables,
        views,
        indexes,
        triggers: names("trigger")?,
    })
}

pub fn user_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}
