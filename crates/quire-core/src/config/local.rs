use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::DEFAULT_LEDGER_TABLE;

/// Embedded (single-file) database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Path of the database file. Created if missing.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// How long to wait on a locked database file, in seconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,

    /// Table recording applied migrations.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

impl LocalConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            busy_timeout_secs: default_busy_timeout(),
            ledger_table: default_ledger_table(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("quire.db")
}

fn default_busy_timeout() -> u64 {
    5
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}
