mod error;
mod ledger;
mod registry;
mod runner;
mod unit;

pub use error::{ForeignKeyViolation, MigrationError, StatementFailure};
pub use ledger::{AppliedUnit, Dialect, Ledger};
pub use registry::{ChecksumDrift, Diff, Registry};
pub use runner::{with_deadline, MigrationReport, MigrationRunner, MigrationStatus, StatusEntry};
pub use unit::{
    is_valid_slug, parse_identifier, split_sql_statements, Action, Direction, Integrity,
    Migration, Procedure,
};
