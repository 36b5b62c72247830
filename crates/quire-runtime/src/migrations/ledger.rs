use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::MigrationError;
use super::unit::parse_identifier;

/// SQL dialect of a ledger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// One row of the ledger: a migration that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedUnit {
    pub identifier: String,
    pub applied_at: DateTime<Utc>,
    /// Checksum of the forward SQL at apply time. `None` for procedures and
    /// for rows written by older builds.
    pub checksum: Option<String>,
    pub execution_time_ms: Option<i64>,
}

impl AppliedUnit {
    /// Sequence number parsed from the identifier, if it is well formed.
    pub fn sequence(&self) -> Option<u32> {
        parse_identifier(&self.identifier).map(|(sequence, _)| sequence)
    }
}

/// The per-database table recording which migrations have been applied.
///
/// Only the SQL is built here; the adapters run it.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    dialect: Dialect,
}

impl Ledger {
    /// Create a ledger handle. The table name is interpolated into SQL, so it
    /// must be a plain identifier or `schema.table`.
    pub fn new(table: &str, dialect: Dialect) -> Result<Self, MigrationError> {
        if !is_valid_table_name(table) {
            return Err(MigrationError::Configuration(format!(
                "Invalid ledger table name '{}'",
                table
            )));
        }
        Ok(Self {
            table: table.to_string(),
            dialect,
        })
    }

    pub fn create_table_sql(&self) -> String {
        match self.dialect {
            Dialect::Sqlite => format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                identifier TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT,
                execution_time_ms INTEGER
            )
            "#,
                self.table
            ),
            Dialect::Postgres => format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                identifier VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum VARCHAR(64),
                execution_time_ms BIGINT
            )
            "#,
                self.table
            ),
        }
    }

    pub fn select_applied_sql(&self) -> String {
        format!(
            "SELECT identifier, applied_at, checksum, execution_time_ms FROM {} ORDER BY identifier ASC",
            self.table
        )
    }

    /// Insert binding identifier, applied_at, checksum, execution_time_ms.
    pub fn insert_sql(&self) -> String {
        let placeholders = match self.dialect {
            Dialect::Sqlite => "?, ?, ?, ?",
            Dialect::Postgres => "$1, $2, $3, $4",
        };
        format!(
            "INSERT INTO {} (identifier, applied_at, checksum, execution_time_ms) VALUES ({})",
            self.table, placeholders
        )
    }

    /// Delete binding identifier.
    pub fn delete_sql(&self) -> String {
        let placeholder = match self.dialect {
            Dialect::Sqlite => "?",
            Dialect::Postgres => "$1",
        };
        format!("DELETE FROM {} WHERE identifier = {}", self.table, placeholder)
    }
}

fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_plain_identifier(part))
}

fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
