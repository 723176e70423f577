use rusqlite::ffi;
use thiserror::Error;

/// Which integrity rule a rejected write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    PrimaryKey,
    ForeignKey,
    Check,
    NotNull,
    Other,
}

impl ConstraintKind {
    fn from_extended_code(code: i32) -> Self {
        match code {
            c if c == ffi::SQLITE_CONSTRAINT_UNIQUE => Self::Unique,
            c if c == ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Self::PrimaryKey,
            c if c == ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Self::ForeignKey,
            c if c == ffi::SQLITE_CONSTRAINT_CHECK => Self::Check,
            c if c == ffi::SQLITE_CONSTRAINT_NOTNULL => Self::NotNull,
            _ => Self::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Db(rusqlite::Error),

    #[error("Constraint violation ({kind:?}): {message}")]
    ConstraintViolation { kind: ConstraintKind, message: String },

    #[error("Store upgrade failed at version {version}: {source}")]
    MigrationFailed {
        version: u32,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("Store version {stored} is newer than supported version {supported}; downgrade is not possible")]
    DowngradeRejected { stored: u32, supported: u32 },

    #[error("Store version {stored} is too old to upgrade (oldest supported: {oldest})")]
    UnsupportedVersion { stored: u32, oldest: u32 },

    #[error("External resource unavailable: {0}")]
    ExternalResourceUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unknown account: {0}")]
    UnknownAccount(i64),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(i64),

    #[error("Unknown template: {0}")]
    UnknownTemplate(i64),

    #[error("Split parts add up to {actual}, parent amount is {expected}")]
    UnbalancedSplit { expected: i64, actual: i64 },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    /// Errors that leave the store unusable no matter how often the caller retries.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::DowngradeRejected { .. } | Self::MigrationFailed { .. } | Self::UnsupportedVersion { .. }
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation {
                    kind: ConstraintKind::from_extended_code(err.extended_code),
                    message: message.unwrap_or_else(|| err.to_string()),
                }
            }
            other => Self::Db(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');").unwrap();
        let err: LedgerError = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err().into();
        match err {
            LedgerError::ConstraintViolation { kind, .. } => assert_eq!(kind, ConstraintKind::Unique),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER CHECK (v IN (0, 1)));").unwrap();
        let err: LedgerError = conn.execute("INSERT INTO t VALUES (5)", []).unwrap_err().into();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_other_failures_stay_generic() {
        let conn = Connection::open_in_memory().unwrap();
        let err: LedgerError = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, LedgerError::Db(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_downgrade_is_not_retryable() {
        let err = LedgerError::DowngradeRejected { stored: 63, supported: 50 };
        assert!(!err.is_retryable());
    }
}
