use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{CheckCommand, ConfigCommand, SyncCommand, TablesCommand};
use dbsync::config::Config;

#[derive(Parser)]
#[command(name = "dbsync")]
#[command(version)]
#[command(about = "Bidirectional dev/prod database sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge dev and prod, newest row wins
    Sync(SyncCommand),

    /// Check schema versions and registry drift without writing
    Check(CheckCommand),

    /// List synced tables in dependency order
    Tables(TablesCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Sync(cmd)) => cmd.run(&config).await?,
        Some(Commands::Check(cmd)) => cmd.run(&config).await?,
        Some(Commands::Tables(cmd)) => cmd.run()?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
