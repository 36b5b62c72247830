use std::collections::{HashMap, HashSet};
use std::fmt;

use quire_core::TargetKind;
use sqlx::Database;

use super::error::MigrationError;
use super::ledger::AppliedUnit;
use super::unit::{is_valid_slug, parse_identifier, Migration};

/// The ordered, validated set of migrations compiled in for one target.
pub struct Registry<DB: Database> {
    target: TargetKind,
    units: Vec<Migration<DB>>,
}

impl<DB: Database> Registry<DB> {
    /// Validate and sort a migration catalog.
    ///
    /// Sequence numbers must be positive and unique and slugs must match
    /// `[a-z0-9_]+`. Registration order does not matter.
    pub fn new(target: TargetKind, mut units: Vec<Migration<DB>>) -> Result<Self, MigrationError> {
        for unit in &units {
            if unit.sequence() == 0 {
                return Err(MigrationError::Configuration(format!(
                    "{} migration '{}' has sequence number 0; numbering starts at 1",
                    target,
                    unit.slug()
                )));
            }
            if !is_valid_slug(unit.slug()) {
                return Err(MigrationError::Configuration(format!(
                    "{} migration {} has invalid slug '{}' (expected [a-z0-9_]+)",
                    target,
                    unit.sequence(),
                    unit.slug()
                )));
            }
        }

        units.sort_by_key(|unit| unit.sequence());

        for pair in units.windows(2) {
            if pair[0].sequence() == pair[1].sequence() {
                return Err(MigrationError::Configuration(format!(
                    "{} migrations '{}' and '{}' share sequence number {}",
                    target,
                    pair[0].identifier(),
                    pair[1].identifier(),
                    pair[0].sequence()
                )));
            }
        }

        Ok(Self { target, units })
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    /// Units in ascending sequence order.
    pub fn units(&self) -> &[Migration<DB>] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&Migration<DB>> {
        self.units.iter().find(|unit| unit.identifier() == identifier)
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.units.iter().map(Migration::identifier).collect()
    }

    pub fn latest(&self) -> Option<&Migration<DB>> {
        self.units.last()
    }

    /// Compare the catalog with a ledger snapshot. Pure; never fails.
    pub fn diff(&self, applied: &[AppliedUnit]) -> Diff<'_, DB> {
        let recorded: HashMap<&str, &AppliedUnit> = applied
            .iter()
            .map(|record| (record.identifier.as_str(), record))
            .collect();

        let mut pending = Vec::new();
        let mut drifted = Vec::new();
        let mut current = 0;

        for unit in &self.units {
            let identifier = unit.identifier();
            match recorded.get(identifier.as_str()) {
                Some(record) => {
                    current += 1;
                    if let (Some(recorded), Some(expected)) = (&record.checksum, unit.checksum()) {
                        if *recorded != expected {
                            drifted.push(ChecksumDrift {
                                identifier,
                                recorded: recorded.clone(),
                                expected,
                            });
                        }
                    }
                }
                None => pending.push(unit),
            }
        }

        let known: HashSet<String> = self.identifiers().into_iter().collect();
        let unknown = applied
            .iter()
            .filter(|record| !known.contains(&record.identifier))
            .map(|record| record.identifier.clone())
            .collect();

        Diff {
            pending,
            unknown,
            drifted,
            current,
        }
    }

    /// Compute the migrations still to run, refusing to proceed when the
    /// ledger contradicts the catalog.
    ///
    /// Fails when an applied migration's SQL has changed since it ran, or
    /// when the ledger holds a different migration under a sequence number the
    /// catalog uses (a renamed or replaced unit). Ledger rows unknown to the
    /// catalog are otherwise tolerated.
    pub fn plan(&self, applied: &[AppliedUnit]) -> Result<Diff<'_, DB>, MigrationError> {
        let diff = self.diff(applied);

        if let Some(drift) = diff.drifted.first() {
            return Err(MigrationError::ChecksumMismatch {
                target: self.target,
                identifier: drift.identifier.clone(),
                recorded: drift.recorded.clone(),
                expected: drift.expected.clone(),
            });
        }

        for identifier in &diff.unknown {
            let Some(sequence) = parse_identifier(identifier).map(|(s, _)| s) else {
                continue;
            };
            if let Some(unit) = self.units.iter().find(|unit| unit.sequence() == sequence) {
                return Err(MigrationError::Configuration(format!(
                    "{} ledger records '{}' but sequence {} is now '{}'; applied migrations must not be renamed",
                    self.target,
                    identifier,
                    sequence,
                    unit.identifier()
                )));
            }
        }

        Ok(diff)
    }
}

/// Result of comparing a catalog with a ledger.
pub struct Diff<'r, DB: Database> {
    /// Units not yet applied, in ascending sequence order.
    pub pending: Vec<&'r Migration<DB>>,
    /// Ledger identifiers this build does not know about.
    pub unknown: Vec<String>,
    /// Applied units whose SQL has changed since.
    pub drifted: Vec<ChecksumDrift>,
    /// Number of catalog units already applied.
    pub current: usize,
}

impl<DB: Database> fmt::Debug for Registry<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("target", &self.target)
            .field("units", &self.units)
            .finish()
    }
}

impl<DB: Database> fmt::Debug for Diff<'_, DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diff")
            .field("pending", &self.pending)
            .field("unknown", &self.unknown)
            .field("drifted", &self.drifted)
            .field("current", &self.current)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDrift {
    pub identifier: String,
    pub recorded: String,
    pub expected: String,
}
