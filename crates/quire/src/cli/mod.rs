mod migrate;
mod run;

pub use migrate::MigrateCommand;
pub use run::RunCommand;

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use quire::migrations::MigrationReport;
use quire::{QuireConfig, QuireError, TargetKind};

/// Quire - notes and time tracking, local first
#[derive(Parser)]
#[command(name = "quire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Migrate every configured database, as on application startup.
    Run(RunCommand),

    /// Manage database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

/// Which databases a command acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSelection {
    All,
    Only(TargetKind),
}

impl TargetSelection {
    pub fn includes(&self, kind: TargetKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => *only == kind,
        }
    }
}

impl FromStr for TargetSelection {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            other => other.parse().map(Self::Only),
        }
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()))
        .init();
}

fn load_config(path: &str) -> Result<QuireConfig> {
    // Load .env if present
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!(
            "Configuration file not found: {}\nCreate it or pass --config <path>.",
            path
        );
    }

    Ok(QuireConfig::from_file(path)?)
}

fn print_header(title: &str) {
    println!();
    println!(
        "  {}  {} {}",
        style("📓").bold(),
        style("QUIRE").bold().cyan(),
        title
    );
    println!();
}

fn print_report(report: &MigrationReport) {
    if !report.configured {
        println!(
            "  {} {} database not configured, skipped",
            style("ℹ").blue(),
            report.target
        );
        return;
    }

    for identifier in &report.applied {
        println!("    {} {}", style("↑").green(), style(identifier).cyan());
    }

    if report.applied.is_empty() {
        println!(
            "  {} {} database is up to date ({} migrations)",
            style("✓").green(),
            report.target,
            report.already_applied
        );
    } else {
        println!(
            "  {} Applied {} {} migration(s) in {}ms",
            style("✓").green(),
            report.applied_count(),
            report.target,
            report.elapsed.as_millis()
        );
    }

    for identifier in &report.unknown {
        println!(
            "  {} {} is recorded in the {} ledger but unknown to this build",
            style("!").yellow(),
            style(identifier).yellow(),
            report.target
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["quire", "run", "--config", "custom.toml", "--verbose"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_migrate_up() {
        let cli = Cli::try_parse_from(["quire", "migrate", "up", "--target", "shared"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_migrate_down_requires_target() {
        assert!(Cli::try_parse_from(["quire", "migrate", "down", "2", "--target", "local"]).is_ok());
        assert!(Cli::try_parse_from(["quire", "migrate", "down", "2"]).is_err());
        assert!(Cli::try_parse_from(["quire", "migrate", "down", "--target", "all"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_target() {
        let cli = Cli::try_parse_from(["quire", "migrate", "status", "--target", "cloud"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_target_selection() {
        assert_eq!("all".parse::<TargetSelection>().unwrap(), TargetSelection::All);
        let local: TargetSelection = "local".parse().unwrap();
        assert!(local.includes(TargetKind::Local));
        assert!(!local.includes(TargetKind::Shared));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.toml");
        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }
}
