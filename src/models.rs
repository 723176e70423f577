use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Row id of the reserved category that split parents point at.
pub const SPLIT_CATID: i64 = 0;
pub const SPLIT_CATEGORY_LABEL: &str = "__SPLIT_TRANSACTION__";
pub const DEFAULT_ACCOUNT_COLOR: i64 = -16738680;

// ---------------------------------------------------------------------------
// Enumerations stored as text
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_str()?;
                $name::parse(raw).ok_or_else(|| FromSqlError::Other(
                    format!("invalid {} value: {raw}", stringify!($name)).into(),
                ))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Cash,
    Bank,
    Ccard,
    Asset,
    Liability,
}

text_enum!(AccountType {
    Cash => "CASH",
    Bank => "BANK",
    Ccard => "CCARD",
    Asset => "ASSET",
    Liability => "LIABILITY",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grouping {
    None,
    Day,
    Week,
    Month,
    Year,
}

text_enum!(Grouping {
    None => "NONE",
    Day => "DAY",
    Week => "WEEK",
    Month => "MONTH",
    Year => "YEAR",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrStatus {
    Unreconciled,
    Cleared,
    Reconciled,
    Void,
}

text_enum!(CrStatus {
    Unreconciled => "UNRECONCILED",
    Cleared => "CLEARED",
    Reconciled => "RECONCILED",
    Void => "VOID",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

text_enum!(ChangeType {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
});

/// Stored as an integer in `transactions.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Normal,
    Exported,
    /// Transient rows of a split edit in progress.
    Uncommitted,
}

impl TransactionStatus {
    pub fn code(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Exported => 1,
            Self::Uncommitted => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Exported),
            2 => Some(Self::Uncommitted),
            _ => None,
        }
    }

    pub fn is_uncommitted(&self) -> bool {
        matches!(self, Self::Uncommitted)
    }
}

impl ToSql for TransactionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for TransactionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_i64()?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

pub fn instant_from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub label: String,
    pub opening_balance: i64,
    pub description: Option<String>,
    pub currency: String,
    pub account_type: AccountType,
    pub color: i64,
    pub grouping: Grouping,
    pub usages: i64,
    pub last_used: Option<i64>,
    pub sort_key: Option<i64>,
    pub sync_account_name: Option<String>,
    pub sync_sequence_local: i64,
    pub exclude_from_totals: bool,
    pub uuid: Option<String>,
}

impl Account {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("_id")?,
            label: row.get("label")?,
            opening_balance: row.get::<_, Option<i64>>("opening_balance")?.unwrap_or(0),
            description: row.get("description")?,
            currency: row.get("currency")?,
            account_type: row.get("type")?,
            color: row.get::<_, Option<i64>>("color")?.unwrap_or(DEFAULT_ACCOUNT_COLOR),
            grouping: row.get("grouping")?,
            usages: row.get::<_, Option<i64>>("usages")?.unwrap_or(0),
            last_used: row.get("last_used")?,
            sort_key: row.get("sort_key")?,
            sync_account_name: row.get("sync_account_name")?,
            sync_sequence_local: row.get::<_, Option<i64>>("sync_sequence_local")?.unwrap_or(0),
            exclude_from_totals: row.get::<_, Option<bool>>("exclude_from_totals")?.unwrap_or(false),
            uuid: row.get("uuid")?,
        })
    }

    pub fn is_synced(&self) -> bool {
        self.sync_account_name.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub label: String,
    pub opening_balance: i64,
    pub description: Option<String>,
    pub currency: String,
    pub account_type: AccountType,
    pub color: i64,
    pub grouping: Grouping,
    pub exclude_from_totals: bool,
    pub uuid: Option<String>,
}

impl NewAccount {
    pub fn new(label: &str, currency: &str) -> Self {
        Self {
            label: label.to_string(),
            opening_balance: 0,
            description: None,
            currency: currency.to_string(),
            account_type: AccountType::Cash,
            color: DEFAULT_ACCOUNT_COLOR,
            grouping: Grouping::None,
            exclude_from_totals: false,
            uuid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub comment: Option<String>,
    pub date: DateTime<Utc>,
    pub amount: i64,
    pub cat_id: Option<i64>,
    pub account_id: i64,
    pub payee_id: Option<i64>,
    pub transfer_peer: Option<i64>,
    pub transfer_account: Option<i64>,
    pub method_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub status: TransactionStatus,
    pub cr_status: CrStatus,
    pub reference_number: Option<String>,
    pub picture_uri: Option<String>,
    pub uuid: Option<String>,
}

impl Transaction {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("_id")?,
            comment: row.get("comment")?,
            date: instant_from_secs(row.get("date")?),
            amount: row.get("amount")?,
            cat_id: row.get("cat_id")?,
            account_id: row.get("account_id")?,
            payee_id: row.get("payee_id")?,
            transfer_peer: row.get("transfer_peer")?,
            transfer_account: row.get("transfer_account")?,
            method_id: row.get("method_id")?,
            parent_id: row.get("parent_id")?,
            status: row.get("status")?,
            cr_status: row.get("cr_status")?,
            reference_number: row.get("number")?,
            picture_uri: row.get("picture_id")?,
            uuid: row.get("uuid")?,
        })
    }

    pub fn is_split_part(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_transfer(&self) -> bool {
        self.transfer_account.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub comment: Option<String>,
    pub cat_id: Option<i64>,
    pub payee_id: Option<i64>,
    pub transfer_peer: Option<i64>,
    pub transfer_account: Option<i64>,
    pub method_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub status: TransactionStatus,
    pub cr_status: CrStatus,
    pub reference_number: Option<String>,
    pub picture_uri: Option<String>,
    pub uuid: Option<String>,
}

impl NewTransaction {
    pub fn new(account_id: i64, amount: i64, date: DateTime<Utc>) -> Self {
        Self {
            account_id,
            amount,
            date,
            comment: None,
            cat_id: None,
            payee_id: None,
            transfer_peer: None,
            transfer_account: None,
            method_id: None,
            parent_id: None,
            status: TransactionStatus::Normal,
            cr_status: CrStatus::Unreconciled,
            reference_number: None,
            picture_uri: None,
            uuid: None,
        }
    }
}

/// Sparse patch; `None` leaves a field alone, `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub comment: Option<Option<String>>,
    pub date: Option<DateTime<Utc>>,
    pub amount: Option<i64>,
    pub cat_id: Option<Option<i64>>,
    pub account_id: Option<i64>,
    pub payee_id: Option<Option<i64>>,
    pub transfer_peer: Option<Option<i64>>,
    pub transfer_account: Option<Option<i64>>,
    pub method_id: Option<Option<i64>>,
    pub parent_id: Option<Option<i64>>,
    pub status: Option<TransactionStatus>,
    pub cr_status: Option<CrStatus>,
    pub reference_number: Option<Option<String>>,
    pub picture_uri: Option<Option<String>>,
}

impl TransactionUpdate {
    pub fn apply_to(&self, row: &Transaction) -> Transaction {
        let mut next = row.clone();
        if let Some(v) = &self.comment {
            next.comment = v.clone();
        }
        if let Some(v) = self.date {
            next.date = v;
        }
        if let Some(v) = self.amount {
            next.amount = v;
        }
        if let Some(v) = self.cat_id {
            next.cat_id = v;
        }
        if let Some(v) = self.account_id {
            next.account_id = v;
        }
        if let Some(v) = self.payee_id {
            next.payee_id = v;
        }
        if let Some(v) = self.transfer_peer {
            next.transfer_peer = v;
        }
        if let Some(v) = self.transfer_account {
            next.transfer_account = v;
        }
        if let Some(v) = self.method_id {
            next.method_id = v;
        }
        if let Some(v) = self.parent_id {
            next.parent_id = v;
        }
        if let Some(v) = self.status {
            next.status = v;
        }
        if let Some(v) = self.cr_status {
            next.cr_status = v;
        }
        if let Some(v) = &self.reference_number {
            next.reference_number = v.clone();
        }
        if let Some(v) = &self.picture_uri {
            next.picture_uri = v.clone();
        }
        next
    }
}

/// Money moving between two accounts; `amount` is seen from `account_id`.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub account_id: i64,
    pub transfer_account: i64,
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub comment: Option<String>,
    pub payee_id: Option<i64>,
    pub method_id: Option<i64>,
    pub cr_status: CrStatus,
    pub uuid: Option<String>,
}

impl NewTransfer {
    pub fn new(account_id: i64, transfer_account: i64, amount: i64, date: DateTime<Utc>) -> Self {
        Self {
            account_id,
            transfer_account,
            amount,
            date,
            comment: None,
            payee_id: None,
            method_id: None,
            cr_status: CrStatus::Unreconciled,
            uuid: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitPart {
    pub amount: i64,
    pub cat_id: Option<i64>,
    pub comment: Option<String>,
    /// Makes the part a transfer into this account.
    pub transfer_account: Option<i64>,
}

impl SplitPart {
    pub fn new(amount: i64, cat_id: Option<i64>) -> Self {
        Self {
            amount,
            cat_id,
            comment: None,
            transfer_account: None,
        }
    }
}

/// A split transaction as first written: parent and parts, all uncommitted.
#[derive(Debug, Clone)]
pub struct NewSplit {
    pub account_id: i64,
    pub date: DateTime<Utc>,
    pub amount: i64,
    pub comment: Option<String>,
    pub payee_id: Option<i64>,
    pub parts: Vec<SplitPart>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: i64,
    pub title: String,
    pub comment: Option<String>,
    pub amount: i64,
    pub cat_id: Option<i64>,
    pub account_id: i64,
    pub payee_id: Option<i64>,
    pub is_transfer: bool,
    pub transfer_account: Option<i64>,
    pub method_id: Option<i64>,
    pub usages: i64,
    pub plan_id: Option<i64>,
    /// Apply without asking when a plan instance comes due.
    pub plan_execution_automatic: bool,
    pub uuid: Option<String>,
    pub last_used: Option<i64>,
}

impl Template {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("_id")?,
            title: row.get("title")?,
            comment: row.get("comment")?,
            amount: row.get("amount")?,
            cat_id: row.get("cat_id")?,
            account_id: row.get("account_id")?,
            payee_id: row.get("payee_id")?,
            is_transfer: row.get::<_, Option<bool>>("transfer_peer")?.unwrap_or(false),
            transfer_account: row.get("transfer_account")?,
            method_id: row.get("method_id")?,
            usages: row.get::<_, Option<i64>>("usages")?.unwrap_or(0),
            plan_id: row.get("plan_id")?,
            plan_execution_automatic: row.get::<_, Option<bool>>("plan_execution")?.unwrap_or(false),
            uuid: row.get("uuid")?,
            last_used: row.get("last_used")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub title: String,
    pub comment: Option<String>,
    pub amount: i64,
    pub cat_id: Option<i64>,
    pub account_id: i64,
    pub payee_id: Option<i64>,
    pub transfer_account: Option<i64>,
    pub method_id: Option<i64>,
    pub plan_id: Option<i64>,
    pub plan_execution_automatic: bool,
    pub uuid: Option<String>,
}

impl NewTemplate {
    pub fn new(title: &str, account_id: i64, amount: i64) -> Self {
        Self {
            title: title.to_string(),
            comment: None,
            amount,
            cat_id: None,
            account_id,
            payee_id: None,
            transfer_account: None,
            method_id: None,
            plan_id: None,
            plan_execution_automatic: false,
            uuid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub label: String,
    pub label_normalized: Option<String>,
    pub parent_id: Option<i64>,
    pub usages: i64,
    pub last_used: Option<i64>,
}

impl Category {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("_id")?,
            label: row.get("label")?,
            label_normalized: row.get("label_normalized")?,
            parent_id: row.get("parent_id")?,
            usages: row.get::<_, Option<i64>>("usages")?.unwrap_or(0),
            last_used: row.get("last_used")?,
        })
    }
}

/// One entry of the change log. Also the wire shape of incoming remote changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub account_id: i64,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub sync_sequence_local: Option<i64>,
    pub uuid: String,
    pub timestamp: Option<i64>,
    pub parent_uuid: Option<String>,
    pub comment: Option<String>,
    pub date: Option<i64>,
    pub amount: Option<i64>,
    pub cat_id: Option<i64>,
    pub payee_id: Option<i64>,
    pub transfer_account: Option<i64>,
    pub method_id: Option<i64>,
    pub cr_status: Option<CrStatus>,
    pub reference_number: Option<String>,
    pub picture_uri: Option<String>,
}

impl ChangeRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_id: row.get("account_id")?,
            change_type: row.get("type")?,
            sync_sequence_local: row.get("sync_sequence_local")?,
            uuid: row.get("uuid")?,
            timestamp: row.get("timestamp")?,
            parent_uuid: row.get("parent_uuid")?,
            comment: row.get("comment")?,
            date: row.get("date")?,
            amount: row.get("amount")?,
            cat_id: row.get("cat_id")?,
            payee_id: row.get("payee_id")?,
            transfer_account: row.get("transfer_account")?,
            method_id: row.get("method_id")?,
            cr_status: row.get("cr_status")?,
            reference_number: row.get("number")?,
            picture_uri: row.get("picture_id")?,
        })
    }

    /// A `deleted` record for `uuid` with no field snapshot.
    pub fn deletion(account_id: i64, uuid: &str) -> Self {
        Self {
            account_id,
            change_type: ChangeType::Deleted,
            sync_sequence_local: None,
            uuid: uuid.to_string(),
            timestamp: None,
            parent_uuid: None,
            comment: None,
            date: None,
            amount: None,
            cat_id: None,
            payee_id: None,
            transfer_account: None,
            method_id: None,
            cr_status: None,
            reference_number: None,
            picture_uri: None,
        }
    }

    pub fn has_field_snapshot(&self) -> bool {
        self.comment.is_some()
            || self.date.is_some()
            || self.amount.is_some()
            || self.cat_id.is_some()
            || self.payee_id.is_some()
            || self.transfer_account.is_some()
            || self.method_id.is_some()
            || self.cr_status.is_some()
            || self.reference_number.is_some()
            || self.picture_uri.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_roundtrip() {
        for t in AccountType::ALL {
            assert_eq!(AccountType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(CrStatus::parse("VOID"), Some(CrStatus::Void));
        assert_eq!(ChangeType::parse("bogus"), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TransactionStatus::Uncommitted.code(), 2);
        assert_eq!(TransactionStatus::from_code(1), Some(TransactionStatus::Exported));
        assert_eq!(TransactionStatus::from_code(9), None);
    }

    #[test]
    fn test_update_patch_clears_and_sets() {
        let row = Transaction {
            id: 1,
            comment: Some("lunch".into()),
            date: instant_from_secs(1_000),
            amount: -500,
            cat_id: Some(3),
            account_id: 1,
            payee_id: None,
            transfer_peer: None,
            transfer_account: None,
            method_id: None,
            parent_id: None,
            status: TransactionStatus::Normal,
            cr_status: CrStatus::Unreconciled,
            reference_number: None,
            picture_uri: None,
            uuid: Some("u".into()),
        };
        let patch = TransactionUpdate {
            comment: Some(None),
            amount: Some(-700),
            ..Default::default()
        };
        let next = patch.apply_to(&row);
        assert_eq!(next.comment, None);
        assert_eq!(next.amount, -700);
        assert_eq!(next.cat_id, Some(3));
    }

    #[test]
    fn test_change_record_json_uses_type_key() {
        let record = ChangeRecord::deletion(4, "abc");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""type":"deleted""#));
        assert!(!record.has_field_snapshot());
    }
}
