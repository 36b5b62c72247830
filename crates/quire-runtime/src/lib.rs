pub mod db;
pub mod migrations;
pub mod units;

pub use db::{LocalTarget, MigrationTarget, SharedTarget};
pub use migrations::{
    Migration, MigrationError, MigrationReport, MigrationRunner, MigrationStatus, Registry,
};
