use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use quire::db::{LocalTarget, MigrationTarget, SharedTarget};
use quire::migrations::{
    with_deadline, MigrationReport, MigrationRunner, MigrationStatus, Registry,
};
use quire::{units, QuireConfig, TargetKind};

use super::{init_tracing, load_config, print_header, print_report, TargetSelection};

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "quire.toml", global = true)]
    pub config: String,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations (default behavior).
    Up {
        /// Database to migrate: local, shared or all.
        #[arg(long, default_value = "all")]
        target: TargetSelection,
    },

    /// Revert the last N migrations of one database.
    Down {
        /// Number of migrations to revert.
        #[arg(default_value = "1")]
        count: usize,

        /// Database to revert: local or shared.
        #[arg(long)]
        target: TargetKind,
    },

    /// Show migration status.
    Status {
        /// Database to inspect: local, shared or all.
        #[arg(long, default_value = "all")]
        target: TargetSelection,

        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        init_tracing(if self.verbose { "debug" } else { "warn" });
        let config = load_config(&self.config)?;

        match self.action {
            MigrateAction::Up { target } => up(&config, target).await,
            MigrateAction::Down { count, target } => down(&config, target, count).await,
            MigrateAction::Status { target, json } => status(&config, target, json).await,
        }
    }
}

async fn up(config: &QuireConfig, selection: TargetSelection) -> Result<()> {
    print_header("Migrations");

    if selection.includes(TargetKind::Local) {
        let target = LocalTarget::open(&config.local).await?;
        apply(&target, &units::local_registry()?, config.migrations.timeout()).await?;
        target.close().await;
    }

    if selection.includes(TargetKind::Shared) {
        match connect_shared(config, selection).await? {
            Some(target) => {
                apply(&target, &units::shared_registry()?, config.migrations.timeout()).await?;
                target.close().await;
            }
            None => print_report(&MigrationReport::not_configured(TargetKind::Shared)),
        }
    }

    println!();
    Ok(())
}

async fn apply<T: MigrationTarget>(
    target: &T,
    registry: &Registry<T::Db>,
    deadline: Option<Duration>,
) -> Result<()> {
    println!(
        "  {} Running pending {} migrations...",
        style("→").dim(),
        target.kind()
    );
    let runner = MigrationRunner::new(target, registry);
    let report = with_deadline(target.kind(), deadline, runner.apply()).await?;
    print_report(&report);
    Ok(())
}

async fn down(config: &QuireConfig, kind: TargetKind, count: usize) -> Result<()> {
    print_header("Migrations");

    if count == 0 {
        println!("  {} Nothing to revert (count=0)", style("ℹ").blue());
        return Ok(());
    }

    println!(
        "  {} Reverting {} {} migration(s)...",
        style("→").dim(),
        count,
        kind
    );

    let reverted = match kind {
        TargetKind::Local => {
            let target = LocalTarget::open(&config.local).await?;
            let reverted = revert(&target, &units::local_registry()?, count).await?;
            target.close().await;
            reverted
        }
        TargetKind::Shared => {
            let target = SharedTarget::connect(&config.shared).await?;
            let reverted = revert(&target, &units::shared_registry()?, count).await?;
            target.close().await;
            reverted
        }
    };

    if reverted.is_empty() {
        println!("  {} No migrations to revert", style("ℹ").blue());
    } else {
        for identifier in &reverted {
            println!("  {} Reverted: {}", style("✓").green(), identifier);
        }
        println!();
        println!(
            "  {} Reverted {} migration(s)",
            style("✓").green(),
            reverted.len()
        );
    }
    println!();

    Ok(())
}

async fn revert<T: MigrationTarget>(
    target: &T,
    registry: &Registry<T::Db>,
    count: usize,
) -> Result<Vec<String>> {
    Ok(MigrationRunner::new(target, registry).revert(count).await?)
}

async fn status(config: &QuireConfig, selection: TargetSelection, json: bool) -> Result<()> {
    let mut statuses = Vec::new();

    if selection.includes(TargetKind::Local) {
        let target = LocalTarget::open(&config.local).await?;
        statuses.push(inspect(&target, &units::local_registry()?).await?);
        target.close().await;
    }

    if selection.includes(TargetKind::Shared) {
        if let Some(target) = connect_shared(config, selection).await? {
            statuses.push(inspect(&target, &units::shared_registry()?).await?);
            target.close().await;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    print_header("Migration Status");
    for status in &statuses {
        print_status(status);
    }

    // Legend
    println!(
        "  {} = can be reverted, {} = one-way, {} = changed since applied",
        style("↓").green(),
        style("-").dim(),
        style("✗").red()
    );
    println!();

    Ok(())
}

async fn inspect<T: MigrationTarget>(
    target: &T,
    registry: &Registry<T::Db>,
) -> Result<MigrationStatus> {
    Ok(MigrationRunner::new(target, registry).status().await?)
}

fn print_status(status: &MigrationStatus) {
    println!("  {} {}", style("■").bold(), style(status.target).bold());

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("    {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    // Show applied migrations
    if !status.applied.is_empty() {
        println!("    {} Applied:", style("✓").green());
        for entry in &status.applied {
            let marker = if entry.modified {
                style("✗").red().to_string()
            } else if entry.reversible {
                style("↓").green().to_string()
            } else {
                style("-").dim().to_string()
            };
            let name = if entry.known {
                style(&entry.record.identifier).cyan()
            } else {
                style(&entry.record.identifier).yellow()
            };
            println!(
                "      {} {} {} ({})",
                marker,
                name,
                style("at").dim(),
                entry.record.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    // Show pending migrations
    if !status.pending.is_empty() {
        println!("    {} Pending:", style("○").yellow());
        for identifier in &status.pending {
            println!("      {} {}", style("→").dim(), style(identifier).yellow());
        }
    }

    if !status.unknown.is_empty() {
        println!(
            "    {} {} applied migration(s) unknown to this build",
            style("!").yellow(),
            status.unknown.len()
        );
    }

    println!(
        "    {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();
}

/// Connect to the shared database. `Ok(None)` when it is not configured and
/// the selection did not name it explicitly.
async fn connect_shared(
    config: &QuireConfig,
    selection: TargetSelection,
) -> Result<Option<SharedTarget>> {
    match SharedTarget::connect(&config.shared).await {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.is_not_configured() && selection == TargetSelection::All => Ok(None),
        Err(e) => Err(e.into()),
    }
}
