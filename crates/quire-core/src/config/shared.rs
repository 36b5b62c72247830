use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{is_unresolved_placeholder, DEFAULT_LEDGER_TABLE};

/// Shared workspace database configuration.
///
/// Shared mode is optional: a missing or empty `url` disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Connection URL for the shared database.
    #[serde(default)]
    pub url: Option<String>,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection checkout timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound on waiting for a table lock inside a migration, in seconds.
    /// Zero leaves the server default in place.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Table recording applied migrations.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

impl SharedConfig {
    /// The configured connection URL, or `None` when shared mode is disabled.
    ///
    /// A value that is still a literal `${VAR}` placeholder (the variable was
    /// not set) counts as not configured.
    pub fn connection(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty() && !is_unresolved_placeholder(url))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_secs > 0).then(|| Duration::from_secs(self.lock_timeout_secs))
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            lock_timeout_secs: default_lock_timeout(),
            ledger_table: default_ledger_table(),
        }
    }
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_lock_timeout() -> u64 {
    5
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}
