//! Migration runner.
//!
//! Brings one database target from whatever its ledger says to the newest
//! unit in its catalog. Runs are serialized through the target's lock.

use std::cmp::Reverse;
use std::future::Future;
use std::time::{Duration, Instant};

use quire_core::TargetKind;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::MigrationError;
use super::ledger::AppliedUnit;
use super::registry::Registry;
use super::unit::Migration;
use crate::db::MigrationTarget;

/// Outcome of bringing one target up to date.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub target: TargetKind,
    /// False when the target was skipped because it is not configured.
    pub configured: bool,
    /// Identifiers applied by this run, in order.
    pub applied: Vec<String>,
    /// Catalog units that were already in the ledger.
    pub already_applied: usize,
    /// Ledger rows this build does not know about.
    pub unknown: Vec<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl MigrationReport {
    /// Report for a target that is not configured and was left alone.
    pub fn not_configured(target: TargetKind) -> Self {
        Self {
            target,
            configured: false,
            applied: Vec::new(),
            already_applied: 0,
            unknown: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(value.as_millis())
}

/// Ledger state of one target compared with its catalog.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub target: TargetKind,
    pub applied: Vec<StatusEntry>,
    pub pending: Vec<String>,
    pub unknown: Vec<String>,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    #[serde(flatten)]
    pub record: AppliedUnit,
    /// Present in this build's catalog.
    pub known: bool,
    pub reversible: bool,
    /// The unit's SQL differs from what was applied.
    pub modified: bool,
}

/// Drives one target through its catalog.
pub struct MigrationRunner<'a, T: MigrationTarget> {
    target: &'a T,
    registry: &'a Registry<T::Db>,
}

impl<'a, T: MigrationTarget> MigrationRunner<'a, T> {
    pub fn new(target: &'a T, registry: &'a Registry<T::Db>) -> Self {
        Self { target, registry }
    }

    /// Apply every pending unit in sequence order.
    ///
    /// Stops at the first failure; units before it stay applied and nothing
    /// after it runs. Running again with nothing pending is a no-op.
    pub async fn apply(&self) -> Result<MigrationReport, MigrationError> {
        self.check_catalog()?;
        let started = Instant::now();

        let lock = self.target.acquire_lock().await?;

        let result = self.apply_inner(started).await;

        // Always release lock, even on error
        self.target.release_lock(lock).await;

        result
    }

    async fn apply_inner(&self, started: Instant) -> Result<MigrationReport, MigrationError> {
        let kind = self.target.kind();

        self.target.ensure_ledger().await?;

        let applied = self.target.applied().await?;
        debug!(
            "Already applied {} migrations: {:?}",
            kind,
            applied.iter().map(|a| &a.identifier).collect::<Vec<_>>()
        );

        let plan = self.registry.plan(&applied)?;

        for identifier in &plan.unknown {
            warn!(
                "The {} ledger records migration '{}' which this build does not know; it may come from a newer version",
                kind, identifier
            );
        }

        if plan.pending.is_empty() {
            info!(
                "The {} database is up to date ({} migrations)",
                kind, plan.current
            );
        }

        let mut newly_applied = Vec::with_capacity(plan.pending.len());
        for unit in plan.pending {
            let identifier = unit.identifier();
            info!("Applying {} migration: {}", kind, identifier);

            match self.target.apply_unit(unit).await {
                Ok(elapsed) => {
                    info!("Migration applied: {} ({}ms)", identifier, elapsed.as_millis());
                    newly_applied.push(identifier);
                }
                Err(e) => {
                    error!("Migration {} failed on the {} database: {}", identifier, kind, e);
                    return Err(e);
                }
            }
        }

        Ok(MigrationReport {
            target: kind,
            configured: true,
            applied: newly_applied,
            already_applied: plan.current,
            unknown: plan.unknown,
            elapsed: started.elapsed(),
        })
    }

    /// Compare the ledger with the catalog without changing anything but the
    /// ledger table's existence.
    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        self.check_catalog()?;
        self.target.ensure_ledger().await?;

        let applied = self.target.applied().await?;
        let diff = self.registry.diff(&applied);

        let entries = applied
            .into_iter()
            .map(|record| {
                let unit = self.registry.get(&record.identifier);
                let modified = diff
                    .drifted
                    .iter()
                    .any(|drift| drift.identifier == record.identifier);
                StatusEntry {
                    known: unit.is_some(),
                    reversible: unit.is_some_and(Migration::is_reversible),
                    modified,
                    record,
                }
            })
            .collect();

        Ok(MigrationStatus {
            target: self.target.kind(),
            applied: entries,
            pending: diff.pending.iter().map(|unit| unit.identifier()).collect(),
            unknown: diff.unknown,
        })
    }

    /// Revert the `count` most recently sequenced applied units, newest first.
    ///
    /// Nothing runs unless every selected unit is known to this build and has
    /// a reverse action.
    pub async fn revert(&self, count: usize) -> Result<Vec<String>, MigrationError> {
        self.check_catalog()?;

        let lock = self.target.acquire_lock().await?;

        let result = self.revert_inner(count).await;

        self.target.release_lock(lock).await;

        result
    }

    async fn revert_inner(&self, count: usize) -> Result<Vec<String>, MigrationError> {
        let kind = self.target.kind();

        self.target.ensure_ledger().await?;
        let applied = self.target.applied().await?;
        self.registry.plan(&applied)?;

        // Malformed identifiers sort first so they block the revert.
        let mut newest_first: Vec<&AppliedUnit> = applied.iter().collect();
        newest_first.sort_by_key(|record| Reverse(record.sequence().unwrap_or(u32::MAX)));

        let mut selected = Vec::new();
        for record in newest_first.into_iter().take(count) {
            let unit = self.registry.get(&record.identifier).ok_or_else(|| {
                MigrationError::Configuration(format!(
                    "Cannot revert past '{}': it is recorded in the {} ledger but unknown to this build",
                    record.identifier, kind
                ))
            })?;
            if !unit.is_reversible() {
                return Err(MigrationError::Irreversible {
                    target: kind,
                    identifier: unit.identifier(),
                });
            }
            selected.push(unit);
        }

        if selected.is_empty() {
            info!("No {} migrations to revert", kind);
        }

        let mut reverted = Vec::with_capacity(selected.len());
        for unit in selected {
            let identifier = unit.identifier();
            info!("Reverting {} migration: {}", kind, identifier);

            if let Err(e) = self.target.revert_unit(unit).await {
                error!("Revert of {} failed on the {} database: {}", identifier, kind, e);
                return Err(e);
            }

            info!("Migration reverted: {}", identifier);
            reverted.push(identifier);
        }

        Ok(reverted)
    }

    fn check_catalog(&self) -> Result<(), MigrationError> {
        if self.registry.target() != self.target.kind() {
            return Err(MigrationError::Configuration(format!(
                "{} migrations cannot run against the {} database",
                self.registry.target(),
                self.target.kind()
            )));
        }
        Ok(())
    }
}

/// Bound a whole-target migration by `deadline`. An expired deadline does not
/// roll back units that already committed.
pub async fn with_deadline<T>(
    target: TargetKind,
    deadline: Option<Duration>,
    work: impl Future<Output = Result<T, MigrationError>>,
) -> Result<T, MigrationError> {
    match deadline {
        Some(after) => tokio::time::timeout(after, work)
            .await
            .map_err(|_| MigrationError::Timeout { target, after })?,
        None => work.await,
    }
}
