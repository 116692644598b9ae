use clap::{Args, Subcommand};

use super::OutputFormat;
use dbsync::config::{mask_url, Config, ConfigValue};

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let masked = masked(config);
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&masked)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &masked.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        print_url("dev_database_url", &masked.dev_database_url);
                        print_url("prod_database_url", &masked.prod_database_url);

                        println!("max_connections: {}", masked.max_connections.value);
                        println!("  source: {}", masked.max_connections.source);
                        println!();

                        println!("acquire_timeout_secs: {}", masked.acquire_timeout_secs.value);
                        println!("  source: {}", masked.acquire_timeout_secs.source);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Copy of the config safe to print: database passwords are hidden.
fn masked(config: &Config) -> Config {
    let mut out = config.clone();
    for url in [&mut out.dev_database_url, &mut out.prod_database_url] {
        url.value = url.value.as_deref().map(mask_url);
    }
    out
}

fn print_url(key: &str, url: &ConfigValue<Option<String>>) {
    println!("{}: {}", key, url.value.as_deref().unwrap_or("(not set)"));
    println!("  source: {}", url.source);
    println!();
}
