use clap::Args;

use super::{open_stores, OutputFormat};
use dbsync::config::Config;

/// Verify both databases are on the same migration and match the table registry
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl CheckCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let mut sync = open_stores(config)?;
        let report = sync.check().await?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                println!("Schema version: {} (dev and prod match)", report.schema_version);
                if report.warnings.is_empty() {
                    println!("Registry matches both schemas.");
                } else {
                    println!();
                    println!("Registry drift ({}):", report.warnings.len());
                    for warning in &report.warnings {
                        println!("  - {}", warning);
                    }
                }
            }
        }
        Ok(())
    }
}
