use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};

use crate::capture::WriteContext;
use crate::error::{LedgerError, Result};
use crate::migrations::{upgrade, UpgradeContext};
use crate::schema::{create_schema, user_version, DATABASE_VERSION, OLDEST_UPGRADABLE_VERSION};
use crate::settings::Settings;
use crate::transactions::discard_uncommitted;

/// An open ledger store. Owns the single connection all callers go through.
pub struct Store {
    conn: Connection,
    path: PathBuf,
    read_only: bool,
    repair_failure: Option<String>,
}

impl Store {
    /// Open (creating or upgrading as needed) the store at `path`.
    pub fn open(path: &Path, settings: &Settings) -> Result<Self> {
        Self::open_supporting(path, settings, DATABASE_VERSION)
    }

    /// Open as if this build only knew layouts up to `supported`.
    pub(crate) fn open_supporting(path: &Path, settings: &Settings, supported: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;

        // nothing may be written before the version has been checked
        let stored = user_version(&conn)?;
        if stored > supported {
            return Err(LedgerError::DowngradeRejected { stored, supported });
        }
        if stored != 0 && stored < OLDEST_UPGRADABLE_VERSION {
            return Err(LedgerError::UnsupportedVersion {
                stored,
                oldest: OLDEST_UPGRADABLE_VERSION,
            });
        }

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        if stored == 0 {
            create_schema(&conn, settings)?;
        } else if stored < supported {
            let ctx = UpgradeContext {
                from_version: stored,
                picture_dir_uri: settings.picture_dir_uri.clone(),
            };
            upgrade(&conn, stored, supported, &ctx)?;
        }

        let mut store = Self {
            conn,
            path: path.to_path_buf(),
            read_only: false,
            repair_failure: None,
        };
        store.repair();
        Ok(store)
    }

    /// Open without write access. The stored layout must be the current one.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let stored = user_version(&conn)?;
        if stored > DATABASE_VERSION {
            return Err(LedgerError::DowngradeRejected {
                stored,
                supported: DATABASE_VERSION,
            });
        }
        if stored < DATABASE_VERSION {
            return Err(LedgerError::Other(format!(
                "store at {} is at version {stored} and must be upgraded before read-only use",
                path.display()
            )));
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            read_only: true,
            repair_failure: None,
        })
    }

    /// Enforce foreign keys and purge rows left behind by an interrupted split edit.
    fn repair(&mut self) {
        if let Err(e) = self.conn.execute_batch("PRAGMA foreign_keys=ON;") {
            warn!("could not enable foreign keys: {e}");
        }
        // through the write path, so released attachments are queued as stale
        match discard_uncommitted(&self.conn, WriteContext::LOCAL) {
            Ok(0) => {}
            Ok(n) => info!("purged {n} uncommitted transactions"),
            Err(e) => {
                warn!("could not purge uncommitted transactions: {e}");
                self.repair_failure = Some(e.to_string());
            }
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Set when the open-time purge of uncommitted rows failed.
    pub fn repair_failure(&self) -> Option<&str> {
        self.repair_failure.as_deref()
    }

    pub fn version(&self) -> Result<u32> {
        user_version(&self.conn)
    }

    /// Run `f` inside one transaction; everything it wrote is rolled back if it fails.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Online copy of the whole store to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        let mut dest_conn = Connection::open(dest)?;
        let backup = Backup::new(&self.conn, &mut dest_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        drop(backup);
        // a single self-contained file, readable without the -wal/-shm pair
        dest_conn.execute_batch("PRAGMA journal_mode=DELETE;")?;
        Ok(())
    }
}

/// Run `f` under a named savepoint so it is atomic with or without an
/// enclosing transaction.
pub(crate) fn atomically<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    // releasing the outermost savepoint commits, which can still fail on
    // deferred foreign keys
    match f(conn).and_then(|value| {
        conn.execute_batch(&format!("RELEASE {name}"))?;
        Ok(value)
    }) {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Err(rollback) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                warn!("rollback of {name} failed: {rollback}");
            }
            Err(e)
        }
    }
}
