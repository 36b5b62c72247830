//! Migration catalogs compiled into the binary, one per target.
//!
//! Units are append-only: once released, a unit's forward SQL never changes
//! and new schema work gets the next sequence number.

pub mod local;
pub mod shared;

use quire_core::TargetKind;
use sqlx::{Postgres, Sqlite};

use crate::migrations::{MigrationError, Registry};

/// Validated catalog for the embedded database.
pub fn local_registry() -> Result<Registry<Sqlite>, MigrationError> {
    Registry::new(TargetKind::Local, local::migrations())
}

/// Validated catalog for the shared database.
pub fn shared_registry() -> Result<Registry<Postgres>, MigrationError> {
    Registry::new(TargetKind::Shared, shared::migrations())
}
