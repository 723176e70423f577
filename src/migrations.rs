//! Version-gated upgrade chain.
//!
//! Every step is written against the layout as it existed at that version.
//! Statements are frozen text: none of them may refer to the constants in
//! `schema.rs`, whose meaning follows the current layout.

use log::{info, warn};
use rusqlite::{params, Connection};

use crate::error::{LedgerError, Result};
use crate::fmt::normalize;

/// What a step may need to know beyond the SQL itself.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    /// Version the store was at before this upgrade run started.
    pub from_version: u32,
    /// Directory URI that bare attachment ids are resolved against.
    pub picture_dir_uri: String,
}

pub enum Op {
    /// One or more literal statements.
    Exec(&'static str),
    /// Rename `table` to `{table}_old`, create the new shape, copy rows, drop the old table.
    RebuildTable {
        table: &'static str,
        create: &'static str,
        copy: &'static [&'static str],
    },
    /// Row-by-row data repair that plain SQL cannot express.
    Repair(fn(&Connection, &UpgradeContext) -> Result<()>),
}

pub struct Step {
    /// The store is at this version once the step has been applied.
    pub version: u32,
    pub ops: &'static [Op],
}

impl Step {
    fn rewrites_tables(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Op::RebuildTable { .. }))
    }
}

/// Bring the store from `from` to `to`, one committed transaction per step.
///
/// Foreign keys are off for the whole run and table renames use the legacy
/// semantics, so views and references in other tables keep pointing at the
/// table name rather than following the renamed original.
pub fn upgrade(conn: &Connection, from: u32, to: u32, ctx: &UpgradeContext) -> Result<()> {
    info!("upgrading store from version {from} to {to}");
    conn.execute_batch("PRAGMA foreign_keys=OFF; PRAGMA legacy_alter_table=ON;")?;
    let result = run_steps(conn, from, to, ctx);
    conn.execute_batch("PRAGMA legacy_alter_table=OFF;")?;
    result
}

fn run_steps(conn: &Connection, from: u32, to: u32, ctx: &UpgradeContext) -> Result<()> {
    for step in STEPS.iter().filter(|s| s.version > from && s.version <= to) {
        apply_step(conn, step, ctx).map_err(|e| LedgerError::MigrationFailed {
            version: step.version,
            source: Box::new(e),
        })?;
        if step.rewrites_tables() {
            report_foreign_key_violations(conn, step.version)?;
        }
        info!("store upgraded to version {}", step.version);
    }
    Ok(())
}

fn apply_step(conn: &Connection, step: &Step, ctx: &UpgradeContext) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for op in step.ops {
        match op {
            Op::Exec(sql) => tx.execute_batch(sql)?,
            Op::RebuildTable { table, create, copy } => {
                tx.execute_batch(&format!("ALTER TABLE {table} RENAME to {table}_old"))?;
                tx.execute_batch(create)?;
                for sql in *copy {
                    tx.execute_batch(sql)?;
                }
                tx.execute_batch(&format!("DROP TABLE {table}_old"))?;
            }
            Op::Repair(repair) => repair(&tx, ctx)?,
        }
    }
    tx.pragma_update(None, "user_version", step.version)?;
    tx.commit()?;
    Ok(())
}

fn report_foreign_key_violations(conn: &Connection, version: u32) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (table, rowid, parent) in violations {
        warn!("after version {version}: {table} row {rowid:?} references a missing {parent} row");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Repairs
// ---------------------------------------------------------------------------

fn insert_currencies(conn: &Connection, _ctx: &UpgradeContext) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO currency (code) VALUES (?1)")?;
    for code in crate::currencies::CURRENCY_CODES {
        stmt.execute([code])?;
    }
    Ok(())
}

fn normalize_column(conn: &Connection, table: &str, source: &str, target: &str) -> Result<()> {
    let rows: Vec<(i64, String)> = conn
        .prepare(&format!("SELECT _id, {source} FROM {table}"))?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;
    let mut update = conn.prepare(&format!("UPDATE {table} SET {target} = ?1 WHERE _id = ?2"))?;
    for (id, text) in rows {
        update.execute(params![normalize(&text), id])?;
    }
    Ok(())
}

fn normalize_payees(conn: &Connection, _ctx: &UpgradeContext) -> Result<()> {
    normalize_column(conn, "payee", "name", "name_normalized")
}

fn normalize_categories(conn: &Connection, _ctx: &UpgradeContext) -> Result<()> {
    normalize_column(conn, "categories", "label", "label_normalized")
}

fn seed_template_uuids(conn: &Connection, ctx: &UpgradeContext) -> Result<()> {
    if ctx.from_version >= 47 {
        return Ok(());
    }
    let ids: Vec<i64> = conn
        .prepare("SELECT _id FROM templates WHERE uuid IS NULL")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for id in ids {
        conn.execute(
            "UPDATE templates SET uuid = ?1 WHERE _id = ?2",
            params![uuid::Uuid::new_v4().to_string(), id],
        )?;
    }
    Ok(())
}

fn prefix_picture_paths(conn: &Connection, ctx: &UpgradeContext) -> Result<()> {
    // a NULL picture_id stays NULL through the concatenation
    let prefix = format!("{}/", ctx.picture_dir_uri.trim_end_matches('/'));
    conn.execute(
        "UPDATE transactions set picture_id = ?1||picture_id||'.jpg'",
        [prefix],
    )?;
    Ok(())
}

fn renumber_sort_keys(conn: &Connection, _ctx: &UpgradeContext) -> Result<()> {
    let ids: Vec<i64> = conn
        .prepare("SELECT _id FROM accounts ORDER BY sort_key ASC, _id ASC")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for (position, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE accounts SET sort_key = ?1 WHERE _id = ?2",
            params![position as i64 + 1, id],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Frozen view text, as (re)created by versions 48, 59 and 62
// ---------------------------------------------------------------------------

const DROP_VIEWS_V48: &str = "
DROP VIEW IF EXISTS transactions_committed;
DROP VIEW IF EXISTS transactions_uncommitted;
DROP VIEW IF EXISTS transactions_all;
DROP VIEW IF EXISTS templates_all;
";

const VIEWS_V48: &str = "
CREATE VIEW transactions_committed AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status != 2;
CREATE VIEW transactions_uncommitted AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status = 2;
CREATE VIEW transactions_all AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id;
CREATE VIEW templates_all AS SELECT templates.*, payee.name, paymentmethods.label AS method_label FROM templates LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id;
";

const EXTENDED_VIEWS_V48: &str = "
DROP VIEW IF EXISTS transactions_extended;
DROP VIEW IF EXISTS templates_extended;
CREATE VIEW transactions_extended AS SELECT transactions.*, payee.name, paymentmethods.label AS method_label, color, currency, exclude_from_totals, accounts.label AS account_label, planinstance_transaction.template_id FROM transactions LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN accounts ON account_id = accounts._id LEFT JOIN planinstance_transaction ON transactions._id = planinstance_transaction.transaction_id WHERE status != 2;
CREATE VIEW templates_extended AS SELECT templates.*, payee.name, paymentmethods.label AS method_label, color, currency, exclude_from_totals, accounts.label AS account_label FROM templates LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id LEFT JOIN accounts ON account_id = accounts._id;
";

const CHANGES_VIEW_V59: &str = "
DROP VIEW IF EXISTS changes_extended;
CREATE VIEW changes_extended AS SELECT changes.*, payee.name, paymentmethods.label AS method_label FROM changes LEFT JOIN payee ON payee_id = payee._id LEFT JOIN paymentmethods ON method_id = paymentmethods._id;
";

// ---------------------------------------------------------------------------
// The chain
// ---------------------------------------------------------------------------

pub static STEPS: &[Step] = &[
    Step {
        version: 17,
        ops: &[Op::Exec(
            "drop table accounts;
             CREATE TABLE accounts (_id integer primary key autoincrement, label text not null, opening_balance integer, description text, currency text not null);",
        )],
    },
    Step {
        version: 18,
        ops: &[Op::Exec(
            "CREATE TABLE payee (_id integer primary key autoincrement, name text unique not null);
             ALTER TABLE expenses add column payee text;",
        )],
    },
    Step {
        version: 19,
        ops: &[Op::Exec("ALTER TABLE expenses add column transfer_peer text")],
    },
    Step {
        version: 20,
        ops: &[
            Op::Exec(
                "CREATE TABLE transactions ( _id integer primary key autoincrement, comment text not null, date datetime not null, amount integer not null, cat_id integer, account_id integer, payee  text, transfer_peer integer default null);
                 INSERT INTO transactions (comment,date,amount,cat_id,account_id,payee,transfer_peer) SELECT comment,date,CAST(ROUND(amount*100) AS INTEGER),cat_id,account_id,payee,transfer_peer FROM expenses;
                 DROP TABLE expenses;",
            ),
            Op::RebuildTable {
                table: "accounts",
                create: "CREATE TABLE accounts (_id integer primary key autoincrement, label text not null, opening_balance integer, description text, currency text not null);",
                copy: &["INSERT INTO accounts (label,opening_balance,description,currency) SELECT label,CAST(ROUND(opening_balance*100) AS INTEGER),description,currency FROM accounts_old"],
            },
        ],
    },
    Step {
        version: 21,
        ops: &[Op::Exec(
            "CREATE TABLE paymentmethods (_id integer primary key autoincrement, label text not null, type integer default 0);
             CREATE TABLE accounttype_paymentmethod (type text, method_id integer, primary key (type,method_id));
             INSERT INTO paymentmethods (label,type) VALUES ('CHEQUE',-1);
             INSERT INTO accounttype_paymentmethod (type,method_id) VALUES ('BANK',last_insert_rowid());
             INSERT INTO paymentmethods (label,type) VALUES ('CREDITCARD',-1);
             INSERT INTO accounttype_paymentmethod (type,method_id) VALUES ('BANK',last_insert_rowid());
             INSERT INTO paymentmethods (label,type) VALUES ('DEPOSIT',1);
             INSERT INTO accounttype_paymentmethod (type,method_id) VALUES ('BANK',last_insert_rowid());
             INSERT INTO paymentmethods (label,type) VALUES ('DIRECTDEBIT',-1);
             INSERT INTO accounttype_paymentmethod (type,method_id) VALUES ('BANK',last_insert_rowid());
             ALTER TABLE transactions add column payment_method_id integer;
             ALTER TABLE accounts add column type text default 'CASH';",
        )],
    },
    Step {
        version: 22,
        ops: &[Op::Exec(
            "CREATE TABLE templates ( _id integer primary key autoincrement, comment text not null, amount integer not null, cat_id integer, account_id integer, payee text, transfer_peer integer default null, payment_method_id integer, title text not null);",
        )],
    },
    Step {
        version: 23,
        ops: &[Op::RebuildTable {
            table: "templates",
            create: "CREATE TABLE templates ( _id integer primary key autoincrement, comment text not null, amount integer not null, cat_id integer, account_id integer, payee text, transfer_peer integer default null, payment_method_id integer, title text not null, unique(account_id, title));",
            // duplicate titles within one account are dropped
            copy: &["INSERT OR IGNORE INTO templates(comment,amount,cat_id,account_id,payee,transfer_peer,payment_method_id,title) SELECT comment,amount,cat_id,account_id,payee,transfer_peer,payment_method_id,title FROM templates_old"],
        }],
    },
    Step {
        version: 24,
        ops: &[Op::Exec("ALTER TABLE templates add column usages integer default 0")],
    },
    Step {
        version: 25,
        // non-transfers had NULL here in transactions but 0 in templates
        ops: &[Op::Exec("update transactions set transfer_peer=0 WHERE transfer_peer is null;")],
    },
    Step {
        version: 26,
        ops: &[Op::Exec("alter table accounts add column color integer default -6697984")],
    },
    Step {
        version: 27,
        ops: &[Op::Exec("CREATE TABLE feature_used (feature text not null);")],
    },
    Step {
        version: 28,
        ops: &[
            Op::RebuildTable {
                table: "transactions",
                create: "CREATE TABLE transactions(_id integer primary key autoincrement, comment text, date datetime not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id),payee text, transfer_peer integer references transactions(_id), transfer_account integer references accounts(_id), method_id integer references paymentmethods(_id));",
                copy: &["INSERT INTO transactions (_id,comment,date,amount,cat_id,account_id,payee,transfer_peer,transfer_account,method_id) SELECT _id,comment,date,amount, CASE WHEN transfer_peer THEN null ELSE CASE WHEN cat_id THEN cat_id ELSE null END END, account_id,payee, CASE WHEN transfer_peer THEN transfer_peer ELSE null END, CASE WHEN transfer_peer THEN cat_id ELSE null END, CASE WHEN payment_method_id THEN payment_method_id ELSE null END FROM transactions_old"],
            },
            Op::RebuildTable {
                table: "accounts",
                create: "CREATE TABLE accounts (_id integer primary key autoincrement, label text not null, opening_balance integer, description text, currency text not null, type text not null check (type in ('CASH','BANK','CCARD','ASSET','LIABILITY')) default 'CASH', color integer default -3355444);",
                copy: &["INSERT INTO accounts (_id,label,opening_balance,description,currency,type,color) SELECT _id,label,opening_balance,description,currency,type,color FROM accounts_old"],
            },
            // templates of deleted accounts used to be left behind
            Op::Exec("DELETE FROM templates where account_id not in (SELECT _id FROM accounts) or (cat_id != 0 and transfer_peer = 1 and cat_id not in (SELECT _id from accounts))"),
            Op::RebuildTable {
                table: "templates",
                create: "CREATE TABLE templates ( _id integer primary key autoincrement, comment text not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id),payee text, transfer_peer boolean default false, transfer_account integer references accounts(_id),method_id integer references paymentmethods(_id), title text not null, usages integer default 0, unique(account_id,title));",
                copy: &["INSERT INTO templates (_id,comment,amount,cat_id,account_id,payee,transfer_peer,transfer_account,method_id,title,usages) SELECT _id,comment,amount,CASE WHEN transfer_peer THEN null ELSE CASE WHEN cat_id THEN cat_id ELSE null END END, account_id,payee, CASE WHEN transfer_peer THEN 1 ELSE 0 END, CASE WHEN transfer_peer THEN cat_id ELSE null END, CASE WHEN payment_method_id THEN payment_method_id ELSE null END, title,usages FROM templates_old"],
            },
            Op::RebuildTable {
                table: "categories",
                create: "CREATE TABLE categories (_id integer primary key autoincrement, label text not null, parent_id integer references categories(_id), usages integer default 0, unique (label,parent_id));",
                copy: &["INSERT INTO categories (_id,label,parent_id,usages) SELECT _id,label,CASE WHEN parent_id THEN parent_id ELSE null END,usages FROM categories_old"],
            },
            Op::RebuildTable {
                table: "paymentmethods",
                create: "CREATE TABLE paymentmethods (_id integer primary key autoincrement, label text not null, type integer check (type in (-1,0,1)) default 0);",
                copy: &["INSERT INTO paymentmethods (_id,label,type) SELECT _id,label,type FROM paymentmethods_old"],
            },
            Op::RebuildTable {
                table: "accounttype_paymentmethod",
                create: "CREATE TABLE accounttype_paymentmethod (type text not null check (type in ('CASH','BANK','CCARD','ASSET','LIABILITY')), method_id integer references paymentmethods (_id), primary key (type,method_id));",
                copy: &["INSERT INTO accounttype_paymentmethod (type,method_id) SELECT type,method_id FROM accounttype_paymentmethod_old"],
            },
        ],
    },
    Step {
        version: 29,
        ops: &[Op::Exec("ALTER TABLE transactions add column status integer default 0")],
    },
    Step {
        version: 30,
        ops: &[Op::Exec(
            "ALTER TABLE transactions add column parent_id integer references transactions (_id);
             INSERT OR IGNORE INTO categories (_id,parent_id,label) VALUES (0,0,'__SPLIT_TRANSACTION__');",
        )],
    },
    Step {
        version: 31,
        // an early build used -1 for the split category
        ops: &[Op::Exec("UPDATE OR IGNORE categories SET _id = 0, parent_id = 0 WHERE _id = -1")],
    },
    Step {
        version: 32,
        ops: &[Op::Exec(
            "ALTER TABLE accounts add column grouping text not null check (grouping in ('NONE','DAY','WEEK','MONTH','YEAR')) default 'NONE'",
        )],
    },
    Step {
        version: 33,
        ops: &[Op::Exec(
            "ALTER TABLE accounts add column usages integer default 0;
             UPDATE accounts SET usages = (SELECT count(*) FROM transactions WHERE account_id = accounts._id AND parent_id IS null);",
        )],
    },
    Step {
        version: 34,
        // split parts take the date of their parent
        ops: &[Op::Exec(
            "UPDATE transactions set date = (SELECT date from transactions parent WHERE parent._id = transactions.parent_id) WHERE parent_id IS NOT null",
        )],
    },
    Step {
        version: 35,
        ops: &[Op::Exec(
            "ALTER TABLE transactions add column cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED')) default 'UNRECONCILED'",
        )],
    },
    Step {
        version: 36,
        ops: &[
            Op::RebuildTable {
                table: "transactions",
                create: "CREATE TABLE transactions ( _id integer primary key autoincrement, comment text, date datetime not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id), payee_id integer references payee(_id), transfer_peer integer references transactions(_id), transfer_account integer references accounts(_id), method_id integer references paymentmethods(_id), parent_id integer references transactions(_id), status integer default 0, cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED')) default 'RECONCILED')",
                copy: &[
                    "INSERT INTO payee (name) SELECT DISTINCT payee FROM transactions_old WHERE payee != '' AND NOT exists (SELECT 1 FROM payee WHERE name=transactions_old.payee)",
                    "INSERT INTO transactions (_id,comment,date,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,parent_id,status,cr_status) SELECT _id, comment, date, amount, cat_id, account_id, (SELECT _id from payee WHERE name = payee), transfer_peer, transfer_account, method_id,parent_id,status,cr_status FROM transactions_old",
                ],
            },
            Op::RebuildTable {
                table: "templates",
                create: "CREATE TABLE templates ( _id integer primary key autoincrement, comment text, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id), payee_id integer references payee(_id), transfer_peer boolean default false, transfer_account integer references accounts(_id), method_id integer references paymentmethods(_id), title text not null, usages integer default 0, unique(account_id,title));",
                copy: &[
                    "INSERT INTO payee (name) SELECT DISTINCT payee FROM templates_old WHERE payee != '' AND NOT exists (SELECT 1 FROM payee WHERE name=templates_old.payee)",
                    "INSERT INTO templates (_id,comment,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,title,usages) SELECT _id, comment, amount, cat_id, account_id, (SELECT _id from payee WHERE name = payee), transfer_peer, transfer_account, method_id,title,usages FROM templates_old",
                ],
            },
            Op::Exec(
                "DROP VIEW IF EXISTS committed;
                 DROP VIEW IF EXISTS uncommitted;",
            ),
        ],
    },
    Step {
        version: 37,
        ops: &[Op::Exec(
            "ALTER TABLE transactions add column number text;
             ALTER TABLE paymentmethods add column is_numbered boolean default 0;
             UPDATE paymentmethods SET is_numbered = 1 WHERE label = 'CHEQUE';",
        )],
    },
    Step {
        version: 38,
        ops: &[Op::Exec(
            "ALTER TABLE templates add column plan_id integer;
             ALTER TABLE templates add column plan_execution boolean default 0;",
        )],
    },
    Step {
        version: 39,
        ops: &[
            Op::Exec("CREATE TABLE currency (_id integer primary key autoincrement, code text unique not null);"),
            Op::Repair(insert_currencies),
        ],
    },
    Step {
        version: 40,
        ops: &[Op::Exec(
            "DROP VIEW IF EXISTS transactions_extended;
             DROP VIEW IF EXISTS templates_extended;",
        )],
    },
    Step {
        version: 41,
        ops: &[Op::Exec(
            "CREATE TABLE planinstance_transaction (template_id integer references templates(_id), instance_id integer, transaction_id integer references transactions(_id), primary key (instance_id,transaction_id));",
        )],
    },
    Step {
        version: 42,
        // dates move from local wall-clock text to unix seconds
        ops: &[Op::RebuildTable {
            table: "transactions",
            create: "CREATE TABLE transactions ( _id integer primary key autoincrement, comment text, date datetime not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id), payee_id integer references payee(_id), transfer_peer integer references transactions(_id), transfer_account integer references accounts(_id), method_id integer references paymentmethods(_id), parent_id integer references transactions(_id), status integer default 0, cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED')) default 'RECONCILED', number text)",
            copy: &["INSERT INTO transactions (_id,comment,date,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,parent_id,status,cr_status,number) SELECT _id, comment, strftime('%s',date,'utc'), amount, cat_id, account_id, payee_id, transfer_peer, transfer_account, method_id,parent_id,status,cr_status, number FROM transactions_old"],
        }],
    },
    Step {
        version: 43,
        ops: &[Op::Exec(
            "UPDATE accounts set currency = 'ZMW' WHERE currency = 'ZMK';
             UPDATE currency set code = 'ZMW' WHERE code = 'ZMK';",
        )],
    },
    Step {
        version: 44,
        ops: &[
            Op::RebuildTable {
                table: "planinstance_transaction",
                create: "CREATE TABLE planinstance_transaction (template_id integer references templates(_id) ON DELETE CASCADE, instance_id integer, transaction_id integer references transactions(_id) ON DELETE CASCADE, primary key (instance_id,transaction_id));",
                copy: &["INSERT INTO planinstance_transaction (template_id,instance_id,transaction_id)SELECT template_id,instance_id,transaction_id FROM planinstance_transaction_old"],
            },
            Op::RebuildTable {
                table: "transactions",
                create: "CREATE TABLE transactions ( _id integer primary key autoincrement, comment text, date datetime not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id) ON DELETE CASCADE, payee_id integer references payee(_id), transfer_peer integer references transactions(_id), transfer_account integer references accounts(_id), method_id integer references paymentmethods(_id), parent_id integer references transactions(_id) ON DELETE CASCADE, status integer default 0, cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED')) default 'RECONCILED', number text)",
                copy: &["INSERT INTO transactions (_id,comment,date,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,parent_id,status,cr_status,number) SELECT _id, comment, date, amount, cat_id, account_id, payee_id, transfer_peer, transfer_account, method_id,parent_id,status,cr_status, number FROM transactions_old"],
            },
            Op::RebuildTable {
                table: "templates",
                create: "CREATE TABLE templates ( _id integer primary key autoincrement, comment text, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id) ON DELETE CASCADE, payee_id integer references payee(_id), transfer_peer boolean default 0, transfer_account integer references accounts(_id) ON DELETE CASCADE, method_id integer references paymentmethods(_id), title text not null, usages integer default 0, plan_id integer, plan_execution boolean default 0, unique(account_id,title));",
                copy: &["INSERT INTO templates (_id,comment,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,title,usages,plan_id,plan_execution) SELECT _id, comment, amount, cat_id, account_id, payee_id, transfer_peer, transfer_account, method_id,title,usages, plan_id, plan_execution FROM templates_old"],
            },
            Op::Exec("ALTER TABLE accounts add column sort_key integer"),
        ],
    },
    Step {
        version: 45,
        ops: &[Op::Exec(
            "ALTER TABLE accounts add column exclude_from_totals boolean default 0;
             DROP VIEW IF EXISTS transactions_extended;
             DROP VIEW IF EXISTS templates_extended;",
        )],
    },
    Step {
        version: 46,
        ops: &[
            Op::Exec("ALTER TABLE payee add column name_normalized text"),
            Op::Repair(normalize_payees),
        ],
    },
    Step {
        version: 47,
        ops: &[Op::Exec(
            "ALTER TABLE templates add column uuid text;
             CREATE TABLE event_cache ( title TEXT,description TEXT,dtstart INTEGER,dtend INTEGER,eventTimezone TEXT,duration TEXT,allDay INTEGER NOT NULL DEFAULT 0,rrule TEXT,customAppPackage TEXT,customAppUri TEXT);",
        )],
    },
    Step {
        version: 48,
        ops: &[
            Op::Exec(DROP_VIEWS_V48),
            Op::Exec(VIEWS_V48),
            Op::Exec(EXTENDED_VIEWS_V48),
            Op::Repair(seed_template_uuids),
        ],
    },
    Step {
        version: 49,
        ops: &[Op::Exec("DROP TABLE IF EXISTS templates_old")],
    },
    Step {
        version: 50,
        ops: &[Op::Exec(
            "ALTER TABLE transactions add column picture_id text;
             DROP TABLE IF EXISTS feature_used;",
        )],
    },
    Step {
        version: 51,
        ops: &[
            Op::Repair(prefix_picture_paths),
            Op::Exec(
                "CREATE TABLE stale_uris ( picture_id text);
                 CREATE TRIGGER cache_stale_uri BEFORE DELETE ON transactions WHEN old.picture_id NOT NULL  BEGIN INSERT INTO stale_uris VALUES (old.picture_id); END;",
            ),
        ],
    },
    Step {
        version: 52,
        ops: &[Op::Exec(
            "CREATE INDEX transactions_cat_id_index on transactions(cat_id);
             CREATE INDEX templates_cat_id_index on templates(cat_id);",
        )],
    },
    Step {
        version: 53,
        // VOID clearing status
        ops: &[
            Op::RebuildTable {
                table: "transactions",
                create: "CREATE TABLE transactions( _id integer primary key autoincrement, comment text, date datetime not null, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id) ON DELETE CASCADE,payee_id integer references payee(_id), transfer_peer integer references transactions(_id), transfer_account integer references accounts(_id),method_id integer references paymentmethods(_id),parent_id integer references transactions(_id) ON DELETE CASCADE, status integer default 0, cr_status text not null check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED','VOID')) default 'RECONCILED', number text, picture_id text);",
                copy: &["INSERT INTO transactions (_id,comment,date,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,parent_id,status,cr_status,number,picture_id) SELECT _id, comment, date, amount, cat_id, account_id, payee_id, transfer_peer, transfer_account, method_id,parent_id,status,cr_status, number, picture_id FROM transactions_old"],
            },
            Op::Exec(
                "CREATE TRIGGER cache_stale_uri BEFORE DELETE ON transactions WHEN old.picture_id NOT NULL  BEGIN INSERT INTO stale_uris VALUES (old.picture_id); END;
                 CREATE INDEX transactions_cat_id_index on transactions(cat_id);",
            ),
        ],
    },
    Step {
        version: 54,
        ops: &[Op::Exec(
            "DROP TRIGGER cache_stale_uri;
             CREATE TRIGGER cache_stale_uri AFTER DELETE ON transactions WHEN old.picture_id NOT NULL AND NOT EXISTS (SELECT 1 FROM transactions WHERE picture_id = old.picture_id) BEGIN INSERT INTO stale_uris VALUES (old.picture_id); END;
             UPDATE accounts set color = -16738680 WHERE color = -6697984;",
        )],
    },
    Step {
        version: 55,
        ops: &[
            Op::Exec("ALTER TABLE categories add column label_normalized text"),
            Op::Repair(normalize_categories),
        ],
    },
    Step {
        version: 56,
        // sort order preferences lived outside the store; only the keys move here
        ops: &[
            Op::Exec(
                "ALTER TABLE templates add column last_used datetime;
                 ALTER TABLE categories add column last_used datetime;
                 ALTER TABLE accounts add column last_used datetime;
                 CREATE TRIGGER sort_key_default AFTER INSERT ON accounts BEGIN UPDATE accounts SET sort_key = (SELECT coalesce(max(sort_key),0) FROM accounts) + 1 WHERE _id = NEW._id; END;",
            ),
            Op::Repair(renumber_sort_keys),
        ],
    },
    Step {
        version: 57,
        // drops the unique (account_id,title) constraint
        ops: &[Op::RebuildTable {
            table: "templates",
            create: "CREATE TABLE templates ( _id integer primary key autoincrement, comment text, amount integer not null, cat_id integer references categories(_id), account_id integer not null references accounts(_id) ON DELETE CASCADE, payee_id integer references payee(_id), transfer_peer boolean default 0, transfer_account integer references accounts(_id) ON DELETE CASCADE, method_id integer references paymentmethods(_id), title text not null, usages integer default 0, plan_id integer, plan_execution boolean default 0, uuid text, last_used datetime);",
            copy: &["INSERT INTO templates (_id,comment,amount,cat_id,account_id,payee_id,transfer_peer,transfer_account,method_id,title,usages,plan_id,plan_execution,uuid,last_used) SELECT _id, comment, amount, cat_id, account_id, payee_id, transfer_peer, transfer_account, method_id,title,usages, plan_id, plan_execution, uuid, last_used FROM templates_old"],
        }],
    },
    // fraction digit caching happened outside the store
    Step {
        version: 58,
        ops: &[],
    },
    Step {
        version: 59,
        ops: &[
            Op::Exec(
                "ALTER TABLE transactions add column uuid text;
                 CREATE UNIQUE INDEX transactions_account_uuid ON transactions(account_id,uuid,status);
                 ALTER TABLE accounts add column sync_account_name text;
                 ALTER TABLE accounts add column sync_sequence_local integer default 0;
                 ALTER TABLE accounts add column sync_from_adapter integer default 0;
                 ALTER TABLE accounts add column uuid text;
                 CREATE UNIQUE INDEX accounts_uuid ON accounts(uuid);
                 CREATE TABLE changes ( account_id integer not null references accounts(_id) ON DELETE CASCADE,type text not null check (type in ('created','updated','deleted')), sync_sequence_local integer, uuid text, timestamp datetime DEFAULT (strftime('%s','now')), parent_uuid text, comment text, date datetime, amount integer, cat_id integer references categories(_id) ON DELETE SET NULL, payee_id integer references payee(_id) ON DELETE SET NULL, transfer_account integer references accounts(_id) ON DELETE SET NULL,method_id integer references paymentmethods(_id),cr_status text check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED','VOID')),number text, picture_id text);
                 CREATE TRIGGER insert_increase_category_usage AFTER INSERT ON transactions WHEN new.cat_id IS NOT NULL AND new.cat_id != 0 BEGIN UPDATE categories SET usages = usages + 1, last_used = strftime('%s', 'now')  WHERE _id IN (new.cat_id , (SELECT parent_id FROM categories WHERE _id = new.cat_id)); END;
                 CREATE TRIGGER update_increase_category_usage AFTER UPDATE ON transactions WHEN new.cat_id IS NOT NULL AND (old.cat_id IS NULL OR new.cat_id != old.cat_id) BEGIN UPDATE categories SET usages = usages + 1, last_used = strftime('%s', 'now')  WHERE _id IN (new.cat_id , (SELECT parent_id FROM categories WHERE _id = new.cat_id)); END;
                 CREATE TRIGGER insert_increase_account_usage AFTER INSERT ON transactions WHEN new.parent_id IS NULL BEGIN UPDATE accounts SET usages = usages + 1, last_used = strftime('%s', 'now')  WHERE _id = new.account_id; END;
                 CREATE TRIGGER update_increase_account_usage AFTER UPDATE ON transactions WHEN new.parent_id IS NULL AND new.account_id != old.account_id AND (old.transfer_account IS NULL OR new.account_id != old.transfer_account) BEGIN UPDATE accounts SET usages = usages + 1, last_used = strftime('%s', 'now')  WHERE _id = new.account_id; END;
                 CREATE TRIGGER update_account_sync_null AFTER UPDATE ON accounts WHEN new.sync_account_name IS NULL AND old.sync_account_name IS NOT NULL BEGIN UPDATE accounts SET sync_sequence_local = 0 WHERE _id = old._id; DELETE FROM changes WHERE account_id = old._id; END;",
            ),
            Op::Exec(DROP_VIEWS_V48),
            Op::Exec(VIEWS_V48),
            Op::Exec(EXTENDED_VIEWS_V48),
            Op::Exec(CHANGES_VIEW_V59),
        ],
    },
    Step {
        version: 60,
        // both halves of a transfer share one uuid
        ops: &[Op::Exec(
            "UPDATE transactions set uuid = (select uuid from transactions peers where peers._id = transactions.transfer_peer) where transfer_peer > _id",
        )],
    },
    Step {
        version: 61,
        ops: &[
            // accounts whose log lost uuids start over
            Op::Exec(
                "UPDATE accounts set sync_sequence_local = 0 where _id in (select distinct account_id from changes where uuid is null);
                 DELETE FROM changes where account_id in (select distinct account_id from changes where uuid is null);",
            ),
            Op::RebuildTable {
                table: "changes",
                create: "CREATE TABLE changes ( account_id integer not null references accounts(_id) ON DELETE CASCADE,type text not null check (type in ('created','updated','deleted')), sync_sequence_local integer, uuid text not null, timestamp datetime DEFAULT (strftime('%s','now')), parent_uuid text, comment text, date datetime, amount integer, cat_id integer references categories(_id) ON DELETE SET NULL, payee_id integer references payee(_id) ON DELETE SET NULL, transfer_account integer references accounts(_id) ON DELETE SET NULL,method_id integer references paymentmethods(_id),cr_status text check (cr_status in ('UNRECONCILED','CLEARED','RECONCILED','VOID')),number text, picture_id text)",
                copy: &["INSERT INTO changes (account_id, type, sync_sequence_local, uuid, timestamp, parent_uuid, comment, date, amount, cat_id, payee_id, transfer_account, method_id, cr_status, number, picture_id)SELECT account_id, type, sync_sequence_local, uuid, timestamp, parent_uuid, comment, date, amount, cat_id, payee_id, transfer_account, method_id, cr_status, number, picture_id FROM changes_old"],
            },
        ],
    },
    Step {
        version: 62,
        ops: &[Op::Exec(EXTENDED_VIEWS_V48)],
    },
    Step {
        version: 63,
        // Bookkeeping moves out of SQL triggers into the write path; the
        // triggers are dropped before anything else touches the tables.
        ops: &[
            Op::Exec(
                "CREATE TABLE _sync_state (status integer);
                 DROP TRIGGER IF EXISTS cache_stale_uri;
                 DROP TRIGGER IF EXISTS sort_key_default;
                 DROP TRIGGER IF EXISTS insert_increase_category_usage;
                 DROP TRIGGER IF EXISTS update_increase_category_usage;
                 DROP TRIGGER IF EXISTS insert_increase_account_usage;
                 DROP TRIGGER IF EXISTS update_increase_account_usage;
                 DROP TRIGGER IF EXISTS update_account_sync_null;
                 DROP TRIGGER IF EXISTS insert_change_log;
                 DROP TRIGGER IF EXISTS insert_after_update_change_log;
                 DROP TRIGGER IF EXISTS delete_after_update_change_log;
                 DROP TRIGGER IF EXISTS delete_change_log;
                 DROP TRIGGER IF EXISTS update_change_log;",
            ),
            Op::RebuildTable {
                table: "accounts",
                create: "CREATE TABLE accounts (_id integer primary key autoincrement, label text not null, opening_balance integer, description text, currency text not null, type text not null check (type in ('CASH','BANK','CCARD','ASSET','LIABILITY')) default 'CASH', color integer default -3355444, grouping text not null check (grouping in ('NONE','DAY','WEEK','MONTH','YEAR')) default 'NONE', usages integer default 0,last_used datetime, sort_key integer, sync_account_name text, sync_sequence_local integer default 0,exclude_from_totals boolean default 0, uuid text);",
                copy: &["INSERT INTO accounts (_id,label,opening_balance,description,currency,type,color,grouping,usages,last_used,sort_key,sync_account_name,sync_sequence_local,exclude_from_totals,uuid) SELECT _id,label,opening_balance,description,currency,type,color,grouping,usages,last_used,sort_key,sync_account_name,sync_sequence_local,exclude_from_totals,uuid FROM accounts_old"],
            },
            Op::Exec(
                "CREATE UNIQUE INDEX accounts_uuid ON accounts(uuid);
                 CREATE INDEX IF NOT EXISTS templates_cat_id_index on templates(cat_id);",
            ),
        ],
    },
];

/// Layout of the oldest store the chain accepts.
#[cfg(test)]
pub(crate) const BASELINE_V16: &str = "
CREATE TABLE accounts (_id integer primary key autoincrement, label text not null, opening_balance float, description text, currency text not null);
CREATE TABLE categories (_id integer primary key autoincrement, label text not null, parent_id integer not null default 0, usages integer default 0, unique (label,parent_id));
CREATE TABLE expenses (_id integer primary key autoincrement, comment text not null, date datetime not null, amount float not null, cat_id integer, account_id integer);
PRAGMA user_version = 16;
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{create_schema, snapshot, user_version, DATABASE_VERSION};
    use crate::settings::Settings;

    fn ctx(from: u32) -> UpgradeContext {
        UpgradeContext {
            from_version: from,
            picture_dir_uri: "file:///data/pictures".to_string(),
        }
    }

    fn migrate(conn: &Connection, from: u32, to: u32) {
        upgrade(conn, from, to, &ctx(from)).unwrap();
        assert_eq!(user_version(conn).unwrap(), to);
    }

    fn baseline() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("old.db")).unwrap();
        conn.execute_batch(BASELINE_V16).unwrap();
        conn.execute_batch(
            "INSERT INTO categories (_id, label, parent_id, usages) VALUES (1, 'Food', 0, 3);
             INSERT INTO categories (_id, label, parent_id, usages) VALUES (2, 'Café', 1, 1);
             INSERT INTO expenses (comment, date, amount, cat_id, account_id) VALUES ('lunch', '2012-03-04 10:00:00', 12.5, 2, 1);",
        )
        .unwrap();
        (dir, conn)
    }

    /// A store at `version` as the legacy chain would have left it, with one account.
    fn historical(version: u32) -> (tempfile::TempDir, Connection) {
        let (dir, conn) = baseline();
        if version > 16 {
            migrate(&conn, 16, 17);
            conn.execute(
                "INSERT INTO accounts (label, opening_balance, description, currency) VALUES ('Cash', 0, '', 'EUR')",
                [],
            )
            .unwrap();
            migrate(&conn, 17, version);
        }
        (dir, conn)
    }

    fn fresh() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("fresh.db")).unwrap();
        create_schema(&conn, &Settings::default()).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_chain_is_contiguous() {
        let versions: Vec<u32> = STEPS.iter().map(|s| s.version).collect();
        let expected: Vec<u32> = (17..=DATABASE_VERSION).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn test_every_historical_version_upgrades_to_fresh_layout() {
        let (_fresh_dir, fresh_conn) = fresh();
        let expected = snapshot(&fresh_conn).unwrap();
        for version in 16..DATABASE_VERSION {
            let (_dir, conn) = historical(version);
            migrate(&conn, version, DATABASE_VERSION);
            let actual = snapshot(&conn).unwrap();
            assert_eq!(actual.tables, expected.tables, "tables differ from v{version}");
            assert_eq!(actual.views, expected.views, "views differ from v{version}");
            assert_eq!(actual.indexes, expected.indexes, "indexes differ from v{version}");
            assert!(actual.triggers.is_empty(), "triggers left from v{version}");
        }
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let (_dir, conn) = historical(40);
        migrate(&conn, 40, DATABASE_VERSION);
        let first = snapshot(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        migrate(&conn, DATABASE_VERSION, DATABASE_VERSION);
        assert_eq!(snapshot(&conn).unwrap(), first);
        let again: i64 = conn
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, again);
    }

    #[test]
    fn test_rows_survive_the_whole_chain() {
        let (_dir, conn) = historical(DATABASE_VERSION);
        let (comment, amount, cat_id, account_id, cr_status, transfer_peer, date): (
            String,
            i64,
            Option<i64>,
            i64,
            String,
            Option<i64>,
            i64,
        ) = conn
            .query_row(
                "SELECT comment, amount, cat_id, account_id, cr_status, transfer_peer, date FROM transactions",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
            )
            .unwrap();
        assert_eq!(comment, "lunch");
        assert_eq!(amount, 1250);
        assert_eq!(cat_id, Some(2));
        assert_eq!(account_id, 1);
        assert_eq!(cr_status, "UNRECONCILED");
        assert_eq!(transfer_peer, None);
        // wall-clock text became unix seconds in whatever zone the test runs in
        assert!((date - 1_330_855_200).abs() <= 14 * 3600, "unexpected date {date}");

        let (root_parent, child_parent, normalized): (Option<i64>, Option<i64>, String) = conn
            .query_row(
                "SELECT (SELECT parent_id FROM categories WHERE _id = 1), parent_id, label_normalized FROM categories WHERE _id = 2",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(root_parent, None);
        assert_eq!(child_parent, Some(1));
        assert_eq!(normalized, "cafe");

        let split: String = conn
            .query_row("SELECT label FROM categories WHERE _id = 0", [], |r| r.get(0))
            .unwrap();
        assert_eq!(split, "__SPLIT_TRANSACTION__");
        let usages: i64 = conn
            .query_row("SELECT usages FROM accounts WHERE _id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(usages, 1);
    }

    #[test]
    fn test_payee_text_becomes_reference() {
        let (_dir, conn) = historical(35);
        conn.execute(
            "INSERT INTO transactions (comment, date, amount, account_id, payee, status) VALUES ('rent', '2013-01-01 00:00:00', -90000, 1, 'Landlord', 0)",
            [],
        )
        .unwrap();
        migrate(&conn, 35, DATABASE_VERSION);
        let (name, normalized): (String, String) = conn
            .query_row(
                "SELECT payee.name, payee.name_normalized FROM transactions JOIN payee ON payee_id = payee._id WHERE comment = 'rent'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "Landlord");
        assert_eq!(normalized, "landlord");
    }

    #[test]
    fn test_picture_ids_become_uris() {
        let (_dir, conn) = historical(50);
        conn.execute("UPDATE transactions SET picture_id = 'receipt-1'", []).unwrap();
        conn.execute(
            "INSERT INTO transactions (comment, date, amount, account_id) VALUES ('plain', 1, 5, 1)",
            [],
        )
        .unwrap();
        migrate(&conn, 50, DATABASE_VERSION);
        let uris: Vec<Option<String>> = conn
            .prepare("SELECT picture_id FROM transactions ORDER BY _id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            uris,
            vec![Some("file:///data/pictures/receipt-1.jpg".to_string()), None]
        );
    }

    #[test]
    fn test_old_default_color_is_replaced() {
        let (_dir, conn) = historical(53);
        let color: i64 = conn
            .query_row("SELECT color FROM accounts WHERE _id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(color, -6697984);
        migrate(&conn, 53, DATABASE_VERSION);
        let color: i64 = conn
            .query_row("SELECT color FROM accounts WHERE _id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(color, -16738680);
    }

    #[test]
    fn test_sort_keys_are_renumbered() {
        let (_dir, conn) = historical(55);
        conn.execute_batch(
            "INSERT INTO accounts (label, currency, sort_key) VALUES ('B', 'EUR', 7);
             INSERT INTO accounts (label, currency, sort_key) VALUES ('C', 'EUR', 3);",
        )
        .unwrap();
        migrate(&conn, 55, DATABASE_VERSION);
        let order: Vec<(String, i64)> = conn
            .prepare("SELECT label, sort_key FROM accounts ORDER BY sort_key")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            order,
            vec![("Cash".to_string(), 1), ("C".to_string(), 2), ("B".to_string(), 3)]
        );
    }

    #[test]
    fn test_template_uuids_are_seeded() {
        let (_dir, conn) = historical(46);
        conn.execute(
            "INSERT INTO templates (comment, amount, account_id, title) VALUES ('', 100, 1, 'Rent')",
            [],
        )
        .unwrap();
        migrate(&conn, 46, DATABASE_VERSION);
        let uuid: Option<String> = conn
            .query_row("SELECT uuid FROM templates", [], |r| r.get(0))
            .unwrap();
        assert_eq!(uuid.map(|u| u.len()), Some(36));
    }

    #[test]
    fn test_transfer_halves_get_one_uuid() {
        let (_dir, conn) = historical(59);
        conn.execute_batch(
            "INSERT INTO accounts (label, currency) VALUES ('Bank', 'EUR');
             INSERT INTO transactions (_id, date, amount, account_id, transfer_account, uuid) VALUES (10, 1, -100, 1, 2, 'first');
             INSERT INTO transactions (_id, date, amount, account_id, transfer_account, transfer_peer, uuid) VALUES (11, 1, 100, 2, 1, 10, 'second');
             UPDATE transactions SET transfer_peer = 11 WHERE _id = 10;",
        )
        .unwrap();
        migrate(&conn, 59, DATABASE_VERSION);
        let uuids: Vec<String> = conn
            .prepare("SELECT uuid FROM transactions WHERE _id IN (10, 11)")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(uuids, vec!["second".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_change_log_without_uuids_is_reset() {
        let (_dir, conn) = historical(60);
        conn.execute_batch(
            "UPDATE accounts SET sync_account_name = 'remote', sync_sequence_local = 4;
             INSERT INTO changes (account_id, type, uuid) VALUES (1, 'created', NULL);
             INSERT INTO changes (account_id, type, uuid) VALUES (1, 'updated', 'x');",
        )
        .unwrap();
        migrate(&conn, 60, DATABASE_VERSION);
        let (sequence, changes): (i64, i64) = conn
            .query_row(
                "SELECT sync_sequence_local, (SELECT count(*) FROM changes) FROM accounts WHERE _id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(sequence, 0);
        assert_eq!(changes, 0);
    }

    #[test]
    fn test_failed_step_names_its_version_and_keeps_earlier_ones() {
        let (_dir, conn) = baseline();
        migrate(&conn, 16, 17);
        conn.execute_batch("CREATE TABLE payee (clash integer);").unwrap();
        let err = upgrade(&conn, 17, DATABASE_VERSION, &ctx(17)).unwrap_err();
        match err {
            LedgerError::MigrationFailed { version, .. } => assert_eq!(version, 18),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!LedgerError::MigrationFailed {
            version: 18,
            source: Box::new(LedgerError::Other(String::new())),
        }
        .is_retryable());
        assert_eq!(user_version(&conn).unwrap(), 17);
        let expenses: i64 = conn
            .query_row("SELECT count(*) FROM expenses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(expenses, 1);
    }
}
