pub mod accounts;
pub mod backup;
pub mod changes;
pub mod init;
pub mod plans;
pub mod status;
pub mod sync;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use pocketledger::settings::{load_settings, Settings};
use pocketledger::store::Store;

/// Open the store the saved settings point at, creating or upgrading it.
pub(crate) fn open_store() -> anyhow::Result<(Settings, Store)> {
    let settings = load_settings();
    let path = settings.store_path();
    let store = Store::open(&path, &settings)
        .with_context(|| format!("opening store at {}", path.display()))?;
    Ok((settings, store))
}

#[derive(Parser)]
#[command(name = "pocketledger", about = "Personal-finance ledger store with sync change capture.")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and create (or upgrade) the store.
    Init {
        /// Path for the store (default: ~/Documents/pocketledger)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Show the store location, version and row counts.
    Status,
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Turn change capture on or off for an account.
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Inspect an account's change log.
    Changes {
        #[command(subcommand)]
        command: ChangesCommands,
    },
    /// Run the recurring-plan executor.
    Plans {
        #[command(subcommand)]
        command: PlansCommands,
    },
    /// Back up the store.
    Backup {
        /// Output path (default: <data_dir>/backups/pocketledger-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account label, e.g. 'Savings'
        label: String,
        /// ISO 4217 code (default: the configured local currency)
        #[arg(long)]
        currency: Option<String>,
        /// Account type: CASH, BANK, CCARD, ASSET, LIABILITY
        #[arg(long = "type", default_value = "CASH")]
        account_type: String,
        /// Opening balance in minor units (cents)
        #[arg(long = "opening-balance", default_value = "0", allow_hyphen_values = true)]
        opening_balance: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// List all accounts.
    List,
    /// Delete an account with its transactions, templates and change log.
    Delete {
        /// Account ID (shown in `pocketledger accounts list`)
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Start logging changes for an account.
    Enable {
        account: i64,
        /// Name of the remote sync account
        #[arg(long)]
        name: String,
    },
    /// Stop logging and discard the account's change log.
    Disable { account: i64 },
    /// Advance the account's local sync sequence.
    Bump { account: i64 },
}

#[derive(Subcommand)]
pub enum ChangesCommands {
    /// Show logged changes.
    List {
        account: i64,
        /// Only changes stamped with this sequence number
        #[arg(long)]
        sequence: Option<i64>,
    },
    /// Write the change log as CSV.
    Export {
        account: i64,
        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PlansCommands {
    /// Execute one pass over due plan instances.
    Run {
        /// JSON file listing plan instances: [{"plan_id", "instance_id", "begin"}]
        #[arg(long)]
        instances: String,
    },
}
