use std::fmt;
use std::time::Duration;

use quire_core::TargetKind;
use sqlx::error::ErrorKind;

/// Errors raised while bringing a database target to the current schema.
///
/// Every variant that concerns a single migration carries the target and the
/// migration identifier so a startup failure can name both.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Broken migration catalog or settings. Raised before any database I/O.
    #[error("Migration configuration error: {0}")]
    Configuration(String),

    #[error("The {target} database is not configured")]
    NotConfigured { target: TargetKind },

    #[error("The {target} database is unreachable: {source}")]
    Connectivity {
        target: TargetKind,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to read the {target} migration ledger: {source}")]
    Ledger {
        target: TargetKind,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration '{identifier}' failed on the {target} database ({failure}): {source}")]
    Application {
        target: TargetKind,
        identifier: String,
        failure: StatementFailure,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration '{identifier}' could not be recorded in the {target} ledger and was rolled back: {source}")]
    LedgerWrite {
        target: TargetKind,
        identifier: String,
        #[source]
        source: sqlx::Error,
    },

    /// The commit request failed in flight; the server may or may not have
    /// applied it. Never retried automatically.
    #[error("Commit of migration '{identifier}' on the {target} database has an unknown outcome: {source}")]
    CommitIndeterminate {
        target: TargetKind,
        identifier: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration '{identifier}' left {} foreign key violation(s) in the {target} database", .violations.len())]
    IntegrityViolation {
        target: TargetKind,
        identifier: String,
        violations: Vec<ForeignKeyViolation>,
    },

    #[error("Migration '{identifier}' was changed after it was applied to the {target} database (recorded checksum {recorded}, current {expected})")]
    ChecksumMismatch {
        target: TargetKind,
        identifier: String,
        recorded: String,
        expected: String,
    },

    #[error("Migration '{identifier}' on the {target} database has no reverse action")]
    Irreversible {
        target: TargetKind,
        identifier: String,
    },

    #[error("Migrating the {target} database did not finish within {after:?}")]
    Timeout { target: TargetKind, after: Duration },
}

impl MigrationError {
    /// The target the error concerns, when there is one.
    pub fn target(&self) -> Option<TargetKind> {
        match self {
            Self::Configuration(_) => None,
            Self::NotConfigured { target }
            | Self::Connectivity { target, .. }
            | Self::Ledger { target, .. }
            | Self::Application { target, .. }
            | Self::LedgerWrite { target, .. }
            | Self::CommitIndeterminate { target, .. }
            | Self::IntegrityViolation { target, .. }
            | Self::ChecksumMismatch { target, .. }
            | Self::Irreversible { target, .. }
            | Self::Timeout { target, .. } => Some(*target),
        }
    }

    /// The migration identifier the error concerns, when there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Application { identifier, .. }
            | Self::LedgerWrite { identifier, .. }
            | Self::CommitIndeterminate { identifier, .. }
            | Self::IntegrityViolation { identifier, .. }
            | Self::ChecksumMismatch { identifier, .. }
            | Self::Irreversible { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    pub(crate) fn application(target: TargetKind, identifier: &str, source: sqlx::Error) -> Self {
        Self::Application {
            target,
            identifier: identifier.to_string(),
            failure: StatementFailure::classify(&source),
            source,
        }
    }
}

/// Structured classification of a failed statement, taken from the driver's
/// error kind and SQLSTATE rather than from the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementFailure {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    UndefinedObject,
    Syntax,
    /// The connection dropped or timed out while the statement ran.
    Connection,
    Other,
}

impl StatementFailure {
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => Self::UniqueViolation,
                ErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation,
                ErrorKind::NotNullViolation => Self::NotNullViolation,
                ErrorKind::CheckViolation => Self::CheckViolation,
                _ => match db.code().as_deref() {
                    // undefined_table, undefined_column, undefined_object, undefined_function
                    Some("42P01") | Some("42703") | Some("42704") | Some("42883") => {
                        Self::UndefinedObject
                    }
                    Some("42601") => Self::Syntax,
                    _ => Self::Other,
                },
            },
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection
            }
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UniqueViolation => "unique violation",
            Self::ForeignKeyViolation => "foreign key violation",
            Self::NotNullViolation => "not-null violation",
            Self::CheckViolation => "check violation",
            Self::UndefinedObject => "undefined object",
            Self::Syntax => "syntax error",
            Self::Connection => "connection failure",
            Self::Other => "statement failed",
        }
    }
}

impl fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row reported by an integrity check after a migration ran with
/// referential integrity suspended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    /// Table holding the dangling reference.
    pub table: String,
    /// Offending row, when the table has a rowid.
    pub rowid: Option<i64>,
    /// Table the reference points at.
    pub parent: String,
}
