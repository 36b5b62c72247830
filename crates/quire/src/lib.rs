//! Quire - notes and time tracking, local first.
//!
//! Every install keeps its data in an embedded database; teams can add a
//! shared workspace database. Both carry their own versioned schema, and
//! [`Quire::migrate`] brings them up to date before anything else runs.

mod runtime;

pub use quire_core::{config, QuireConfig, QuireError, TargetKind};
pub use quire_runtime::{db, migrations, units};
pub use runtime::{MigratedDatabases, Quire, QuireBuilder, StartupError};
