use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use quire::Quire;

use super::{init_tracing, load_config, print_report};

/// Migrate every configured database, as on application startup.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "quire.toml")]
    pub config: String,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(if self.verbose { "debug" } else { "info" });

        println!();
        println!(
            "  {}  {} v{}",
            style("📓").bold(),
            style("QUIRE").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!();

        info!("Loading configuration from {}", self.config);
        let config = load_config(&self.config)?;

        println!(
            "  {} Local database at {}",
            style("💾").bold(),
            style(config.local.path.display()).cyan()
        );
        if config.shared.connection().is_some() {
            println!("  {} Shared workspace database enabled", style("🌐").bold());
        }
        println!();

        let quire = Quire::builder().config(config).build()?;

        let databases = quire.migrate().await?;

        for report in &databases.reports {
            print_report(report);
        }
        println!();
        println!("  {} Databases ready", style("✓").green());
        println!();

        databases.local.close().await;
        if let Some(shared) = &databases.shared {
            shared.close().await;
        }

        Ok(())
    }
}
