//! `dbsync sync`: merge the dev and prod databases.

use clap::Args;
use dbsync_core::SyncReport;

use super::{open_stores, OutputFormat};
use dbsync::config::Config;
use dbsync::engine::SyncOptions;

/// Merge dev and prod (last write wins)
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Read and compare everything, write nothing
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let mut sync = open_stores(config)?;

        if matches!(self.format, OutputFormat::Text) {
            if self.dry_run {
                println!("Previewing sync (dry run, nothing will be written)...");
            } else {
                println!("Syncing dev <-> prod...");
            }
            println!();
        }

        let report = sync
            .sync(SyncOptions {
                dry_run: self.dry_run,
            })
            .await?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => print_report(&report),
        }
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    println!("Schema version: {}", report.schema_version);
    println!();
    println!(
        "  {:<34} {:>10} {:>10} {:>10}",
        "table", "dev->prod", "prod->dev", "conflicts"
    );
    for (table, stats) in report.stats.iter() {
        println!(
            "  {:<34} {:>10} {:>10} {:>10}",
            table, stats.dev_to_prod, stats.prod_to_dev, stats.conflicts
        );
    }
    let total = report.stats.total();
    println!(
        "  {:<34} {:>10} {:>10} {:>10}",
        "total", total.dev_to_prod, total.prod_to_dev, total.conflicts
    );
    println!();

    if report.dry_run {
        println!("Singleton flags and deferred foreign keys are not checked in a dry run.");
    } else {
        println!("Singleton flags cleared:        {}", report.singleton_clears);
        println!("Deferred foreign keys restored: {}", report.deferred_updates);
    }

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }

    println!();
    if report.stats.is_zero() {
        println!("Already in sync.");
    } else if report.dry_run {
        println!("Dry run complete; rerun without --dry-run to apply.");
    } else {
        println!("Sync complete.");
    }
}
