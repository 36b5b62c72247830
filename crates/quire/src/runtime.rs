//! Startup orchestration.
//!
//! Before the application serves anything, every configured database is
//! brought to the schema this build expects:
//! - the embedded local database, always
//! - the shared workspace database, when a connection URL is configured

use sqlx::{Postgres, Sqlite};
use tracing::info;

use quire_core::{QuireConfig, QuireError, TargetKind};
use quire_runtime::migrations::{
    with_deadline, Migration, MigrationError, MigrationReport, MigrationRunner, Registry,
};
use quire_runtime::{units, LocalTarget, SharedTarget};

/// Startup failure. Names the database and, where known, the migration.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] QuireError),

    #[error("Invalid migration catalog: {0}")]
    Catalog(#[source] MigrationError),

    #[error("Local database migration failed: {0}")]
    Local(#[source] MigrationError),

    #[error("Shared database migration failed: {0}")]
    Shared(#[source] MigrationError),

    #[error("Local and shared database migrations both failed\n  local: {local}\n  shared: {shared}")]
    Both {
        local: MigrationError,
        shared: MigrationError,
    },
}

impl StartupError {
    /// Migration errors carried by this failure.
    pub fn migration_errors(&self) -> Vec<&MigrationError> {
        match self {
            Self::Config(_) => Vec::new(),
            Self::Catalog(e) | Self::Local(e) | Self::Shared(e) => vec![e],
            Self::Both { local, shared } => vec![local, shared],
        }
    }
}

/// Databases whose schema is current, ready for the rest of the application.
pub struct MigratedDatabases {
    pub local: LocalTarget,
    /// `None` when shared mode is not configured.
    pub shared: Option<SharedTarget>,
    /// One report per target, local first.
    pub reports: Vec<MigrationReport>,
}

impl MigratedDatabases {
    pub fn report(&self, target: TargetKind) -> Option<&MigrationReport> {
        self.reports.iter().find(|report| report.target == target)
    }

    pub fn total_applied(&self) -> usize {
        self.reports.iter().map(MigrationReport::applied_count).sum()
    }
}

/// The Quire startup runtime.
pub struct Quire {
    config: QuireConfig,
    local: Registry<Sqlite>,
    shared: Registry<Postgres>,
}

impl Quire {
    /// Create a new builder for configuring Quire.
    pub fn builder() -> QuireBuilder {
        QuireBuilder::new()
    }

    pub fn config(&self) -> &QuireConfig {
        &self.config
    }

    pub fn local_registry(&self) -> &Registry<Sqlite> {
        &self.local
    }

    pub fn shared_registry(&self) -> &Registry<Postgres> {
        &self.shared
    }

    /// Bring both databases up to date.
    ///
    /// The two targets share no state and migrate concurrently. A failure on
    /// either aborts startup; nothing is retried.
    pub async fn migrate(&self) -> Result<MigratedDatabases, StartupError> {
        info!("Migrating databases");
        let deadline = self.config.migrations.timeout();

        let (local, shared) = tokio::join!(
            with_deadline(TargetKind::Local, deadline, self.migrate_local()),
            with_deadline(TargetKind::Shared, deadline, self.migrate_shared()),
        );

        match (local, shared) {
            (Ok((local, local_report)), Ok((shared, shared_report))) => {
                info!(
                    "Databases ready: {} local and {} shared migration(s) applied",
                    local_report.applied_count(),
                    shared_report.applied_count()
                );
                Ok(MigratedDatabases {
                    local,
                    shared,
                    reports: vec![local_report, shared_report],
                })
            }
            (Err(local), Ok(_)) => Err(StartupError::Local(local)),
            (Ok(_), Err(shared)) => Err(StartupError::Shared(shared)),
            (Err(local), Err(shared)) => Err(StartupError::Both { local, shared }),
        }
    }

    async fn migrate_local(&self) -> Result<(LocalTarget, MigrationReport), MigrationError> {
        let target = LocalTarget::open(&self.config.local).await?;
        let report = MigrationRunner::new(&target, &self.local).apply().await?;
        Ok((target, report))
    }

    async fn migrate_shared(
        &self,
    ) -> Result<(Option<SharedTarget>, MigrationReport), MigrationError> {
        let target = match SharedTarget::connect(&self.config.shared).await {
            Ok(target) => target,
            Err(e) if e.is_not_configured() => {
                info!("Shared database not configured; skipping shared migrations");
                return Ok((None, MigrationReport::not_configured(TargetKind::Shared)));
            }
            Err(e) => return Err(e),
        };

        let report = MigrationRunner::new(&target, &self.shared).apply().await?;
        Ok((Some(target), report))
    }
}

/// Builder for configuring the Quire runtime.
pub struct QuireBuilder {
    config: Option<QuireConfig>,
    local_units: Option<Vec<Migration<Sqlite>>>,
    shared_units: Option<Vec<Migration<Postgres>>>,
}

impl QuireBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            local_units: None,
            shared_units: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: QuireConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the built-in local catalog.
    pub fn local_units(mut self, units: Vec<Migration<Sqlite>>) -> Self {
        self.local_units = Some(units);
        self
    }

    /// Replace the built-in shared catalog.
    pub fn shared_units(mut self, units: Vec<Migration<Postgres>>) -> Self {
        self.shared_units = Some(units);
        self
    }

    /// Build the runtime, validating both catalogs. Performs no I/O.
    pub fn build(self) -> Result<Quire, StartupError> {
        let config = self
            .config
            .ok_or_else(|| QuireError::Config("Configuration is required".to_string()))?;

        let local = Registry::new(
            TargetKind::Local,
            self.local_units.unwrap_or_else(units::local::migrations),
        )
        .map_err(StartupError::Catalog)?;
        let shared = Registry::new(
            TargetKind::Shared,
            self.shared_units.unwrap_or_else(units::shared::migrations),
        )
        .map_err(StartupError::Catalog)?;

        Ok(Quire {
            config,
            local,
            shared,
        })
    }
}

impl Default for QuireBuilder {
    fn default() -> Self {
        Self::new()
    }
}
