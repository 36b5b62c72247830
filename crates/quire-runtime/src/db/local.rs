use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use quire_core::{LocalConfig, TargetKind};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, Row, Sqlite, SqliteConnection};
use tracing::{debug, warn};

use super::MigrationTarget;
use crate::migrations::{
    split_sql_statements, Action, AppliedUnit, Dialect, Direction, ForeignKeyViolation, Ledger,
    Migration, MigrationError,
};

const TARGET: TargetKind = TargetKind::Local;

/// The embedded single-file database.
///
/// The pool holds one connection, so every unit and every integrity check
/// sees the same session.
#[derive(Clone)]
pub struct LocalTarget {
    pool: SqlitePool,
    ledger: Ledger,
    path: PathBuf,
}

impl LocalTarget {
    /// Open (creating if missing) the database file described by `config`.
    pub async fn open(config: &LocalConfig) -> Result<Self, MigrationError> {
        let ledger = Ledger::new(&config.ledger_table, Dialect::Sqlite)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| MigrationError::Connectivity {
                target: TARGET,
                source,
            })?;

        debug!("Opened local database at {}", config.path.display());

        Ok(Self {
            pool,
            ledger,
            path: config.path.clone(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether foreign key enforcement is on for the pooled session.
    pub async fn foreign_keys_enabled(&self) -> sqlx::Result<bool> {
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&self.pool)
            .await?;
        Ok(enabled == 1)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_unit(
        &self,
        unit: &Migration<Sqlite>,
        direction: Direction,
    ) -> Result<Duration, MigrationError> {
        let identifier = unit.identifier();
        let action = unit
            .action(direction)
            .ok_or_else(|| MigrationError::Irreversible {
                target: TARGET,
                identifier: identifier.clone(),
            })?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|source| MigrationError::Connectivity {
                target: TARGET,
                source,
            })?;

        if !unit.integrity().is_suspended() {
            return self
                .transact(&mut conn, unit, &identifier, action, direction)
                .await;
        }

        // The pragma is a no-op inside a transaction, so it is switched
        // before BEGIN and restored after COMMIT or ROLLBACK.
        let mut scope = SuspendedIntegrity::enter(conn)
            .await
            .map_err(|e| MigrationError::application(TARGET, &identifier, e))?;
        debug!("Foreign key enforcement suspended for {}", identifier);

        let result = self
            .transact(scope.connection(), unit, &identifier, action, direction)
            .await;

        scope.restore().await;
        result
    }

    async fn transact(
        &self,
        conn: &mut SqliteConnection,
        unit: &Migration<Sqlite>,
        identifier: &str,
        action: Action<Sqlite>,
        direction: Direction,
    ) -> Result<Duration, MigrationError> {
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| MigrationError::application(TARGET, identifier, e))?;

        match self.run_body(&mut tx, unit, identifier, action, direction).await {
            Ok(elapsed) => {
                // A failed COMMIT leaves nothing applied here; the
                // transaction is rolled back when dropped.
                tx.commit()
                    .await
                    .map_err(|e| MigrationError::application(TARGET, identifier, e))?;
                Ok(elapsed)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Failed to roll back migration {}: {}", identifier, rollback);
                }
                Err(e)
            }
        }
    }

    async fn run_body(
        &self,
        conn: &mut SqliteConnection,
        unit: &Migration<Sqlite>,
        identifier: &str,
        action: Action<Sqlite>,
        direction: Direction,
    ) -> Result<Duration, MigrationError> {
        let started = Instant::now();
        execute_action(conn, action)
            .await
            .map_err(|e| MigrationError::application(TARGET, identifier, e))?;
        let elapsed = started.elapsed();

        if unit.integrity().is_suspended() {
            let violations = foreign_key_violations(conn)
                .await
                .map_err(|e| MigrationError::application(TARGET, identifier, e))?;
            if !violations.is_empty() {
                return Err(MigrationError::IntegrityViolation {
                    target: TARGET,
                    identifier: identifier.to_string(),
                    violations,
                });
            }
        }

        let recorded = match direction {
            Direction::Up => {
                sqlx::query(&self.ledger.insert_sql())
                    .bind(identifier)
                    .bind(Utc::now())
                    .bind(unit.checksum())
                    .bind(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
                    .execute(&mut *conn)
                    .await
            }
            Direction::Down => {
                sqlx::query(&self.ledger.delete_sql())
                    .bind(identifier)
                    .execute(&mut *conn)
                    .await
            }
        };
        recorded.map_err(|source| MigrationError::LedgerWrite {
            target: TARGET,
            identifier: identifier.to_string(),
            source,
        })?;

        Ok(elapsed)
    }
}

impl MigrationTarget for LocalTarget {
    type Db = Sqlite;
    type Lock = ();

    fn kind(&self) -> TargetKind {
        TARGET
    }

    // Single-connection pool over a file this process owns.
    async fn acquire_lock(&self) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn release_lock(&self, _lock: ()) {}

    async fn ensure_ledger(&self) -> Result<(), MigrationError> {
        sqlx::query(&self.ledger.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(|source| MigrationError::Ledger {
                target: TARGET,
                source,
            })?;
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<AppliedUnit>, MigrationError> {
        let rows = sqlx::query(&self.ledger.select_applied_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|source| MigrationError::Ledger {
                target: TARGET,
                source,
            })?;

        rows.iter()
            .map(|row| {
                Ok(AppliedUnit {
                    identifier: row.try_get("identifier")?,
                    applied_at: row.try_get("applied_at")?,
                    checksum: row.try_get("checksum")?,
                    execution_time_ms: row.try_get("execution_time_ms")?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(|source| MigrationError::Ledger {
                target: TARGET,
                source,
            })
    }

    async fn apply_unit(&self, unit: &Migration<Sqlite>) -> Result<Duration, MigrationError> {
        self.run_unit(unit, Direction::Up).await
    }

    async fn revert_unit(&self, unit: &Migration<Sqlite>) -> Result<(), MigrationError> {
        self.run_unit(unit, Direction::Down).await.map(|_| ())
    }
}

async fn execute_action(conn: &mut SqliteConnection, action: Action<Sqlite>) -> sqlx::Result<()> {
    match action {
        Action::Sql(sql) => {
            for statement in split_sql_statements(sql) {
                sqlx::query(&statement).execute(&mut *conn).await?;
            }
            Ok(())
        }
        Action::Procedure(procedure) => procedure(conn).await,
    }
}

async fn foreign_key_violations(
    conn: &mut SqliteConnection,
) -> sqlx::Result<Vec<ForeignKeyViolation>> {
    let rows = sqlx::query("PRAGMA foreign_key_check")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(ForeignKeyViolation {
                table: row.try_get(0)?,
                rowid: row.try_get(1)?,
                parent: row.try_get(2)?,
            })
        })
        .collect()
}

/// A pooled connection with foreign key enforcement switched off.
///
/// Dropping it without [`restore`](Self::restore), through an error, a panic
/// or a cancelled future, detaches the connection from the pool so a session
/// with enforcement off is never handed out again.
struct SuspendedIntegrity {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SuspendedIntegrity {
    async fn enter(conn: PoolConnection<Sqlite>) -> sqlx::Result<Self> {
        let mut scope = Self { conn: Some(conn) };
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *scope.connection())
            .await?;
        Ok(scope)
    }

    fn connection(&mut self) -> &mut SqliteConnection {
        match self.conn.as_mut() {
            Some(conn) => &mut **conn,
            None => unreachable!("connection is only taken when the scope ends"),
        }
    }

    /// Switch enforcement back on and verify it took. A connection that
    /// cannot be restored is closed instead of returned to the pool.
    async fn restore(mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match reenable_foreign_keys(&mut conn).await {
            Ok(true) => debug!("Foreign key enforcement restored"),
            Ok(false) => {
                warn!("Foreign key enforcement still off after restore; discarding connection");
                discard(conn).await;
            }
            Err(e) => {
                warn!("Failed to restore foreign key enforcement, discarding connection: {}", e);
                discard(conn).await;
            }
        }
    }
}

impl Drop for SuspendedIntegrity {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Discarding local connection left with foreign key enforcement off");
            drop(conn.detach());
        }
    }
}

async fn reenable_foreign_keys(conn: &mut SqliteConnection) -> sqlx::Result<bool> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;
    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;
    Ok(enabled == 1)
}

async fn discard(conn: PoolConnection<Sqlite>) {
    if let Err(e) = conn.detach().close().await {
        debug!("Error closing discarded connection: {}", e);
    }
}
