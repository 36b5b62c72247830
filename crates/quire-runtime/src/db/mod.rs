//! Database targets the migration runner can drive.
//!
//! There are exactly two: the embedded single-file database every install
//! has, and the optional networked database a team shares.

mod local;
mod shared;

use std::future::Future;
use std::time::Duration;

use quire_core::TargetKind;

use crate::migrations::{AppliedUnit, Migration, MigrationError};

pub use local::LocalTarget;
pub use shared::{AdvisoryLock, SharedTarget};

mod private {
    pub trait Sealed {}

    impl Sealed for super::LocalTarget {}
    impl Sealed for super::SharedTarget {}
}

/// Engine-specific half of migration execution.
///
/// Every unit runs inside one transaction together with its ledger write:
/// either both commit or neither does.
pub trait MigrationTarget: Send + Sync + private::Sealed {
    type Db: sqlx::Database;

    /// Held for the duration of a run so concurrent processes serialize.
    type Lock: Send;

    fn kind(&self) -> TargetKind;

    fn acquire_lock(&self) -> impl Future<Output = Result<Self::Lock, MigrationError>> + Send;

    /// Release a lock taken by [`acquire_lock`](Self::acquire_lock). Failures
    /// are logged, never returned.
    fn release_lock(&self, lock: Self::Lock) -> impl Future<Output = ()> + Send;

    /// Create the ledger table if it does not exist.
    fn ensure_ledger(&self) -> impl Future<Output = Result<(), MigrationError>> + Send;

    /// Current ledger contents, ordered by identifier.
    fn applied(&self) -> impl Future<Output = Result<Vec<AppliedUnit>, MigrationError>> + Send;

    /// Run a unit's forward action and record it, atomically.
    fn apply_unit(
        &self,
        unit: &Migration<Self::Db>,
    ) -> impl Future<Output = Result<Duration, MigrationError>> + Send;

    /// Run a unit's reverse action and remove its ledger entry, atomically.
    fn revert_unit(
        &self,
        unit: &Migration<Self::Db>,
    ) -> impl Future<Output = Result<(), MigrationError>> + Send;
}
