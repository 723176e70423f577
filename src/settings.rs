use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

pub const STORE_FILE_NAME: &str = "ledger.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_account_label")]
    pub default_account_label: String,
    #[serde(default = "default_account_description")]
    pub default_account_description: String,
    #[serde(default = "default_local_currency")]
    pub local_currency: String,
    /// Prefix used when old attachment ids are turned into URIs during upgrade.
    #[serde(default = "default_picture_dir_uri")]
    pub picture_dir_uri: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Unix seconds of the last completed planner pass.
    #[serde(default)]
    pub planner_last_execution: Option<i64>,
}

fn default_account_label() -> String {
    "Default account".to_string()
}

fn default_account_description() -> String {
    "Created together with the store".to_string()
}

fn default_local_currency() -> String {
    "EUR".to_string()
}

fn default_picture_dir_uri() -> String {
    let dir = default_data_dir().join("pictures");
    format!("file://{}", dir.to_string_lossy())
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            default_account_label: default_account_label(),
            default_account_description: default_account_description(),
            local_currency: default_local_currency(),
            picture_dir_uri: default_picture_dir_uri(),
            busy_timeout_ms: default_busy_timeout_ms(),
            planner_last_execution: None,
        }
    }
}

impl Settings {
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(STORE_FILE_NAME)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("pocketledger")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("pocketledger")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LedgerError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
