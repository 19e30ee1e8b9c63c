use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    /// Database file; `~/.orderdesk/data/orderdesk.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub claims: ClaimsConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            claims: ClaimsConfig::default(),
            orders: OrdersConfig::default(),
        }
    }
}

impl Config {
    /// The configured database path with `~/` expanded, or the default location.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_home(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsConfig {
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_batch_size() -> u32 {
    50
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersConfig {
    /// Prefix of generated order numbers (`ORD-2026-10-001`).
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,
    /// Folders created with every new order.
    #[serde(default = "default_folders")]
    pub default_folders: Vec<String>,
}

fn default_number_prefix() -> String {
    "ORD".to_string()
}

fn default_folders() -> Vec<String> {
    vec!["Original Images".to_string(), "Edited Images".to_string()]
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_number_prefix(),
            default_folders: default_folders(),
        }
    }
}
