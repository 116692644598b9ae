mod check;
mod config_cmd;
mod sync_cmd;
mod tables;

pub use check::CheckCommand;
pub use config_cmd::ConfigCommand;
pub use sync_cmd::SyncCommand;
pub use tables::TablesCommand;

use clap::ValueEnum;
use dbsync::config::Config;
use dbsync::engine::DbSync;
use dbsync::store::{PgStore, PoolSettings};
use std::time::Duration;

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the synchronizer over the configured dev and prod databases.
/// Nothing connects until a command runs.
fn open_stores(config: &Config) -> Result<DbSync<PgStore>, Box<dyn std::error::Error>> {
    let urls = config.database_urls()?;
    let settings = PoolSettings {
        max_connections: config.max_connections.value,
        acquire_timeout: Duration::from_secs(config.acquire_timeout_secs.value),
    };
    let dev = PgStore::new("dev", urls.dev, settings);
    let prod = PgStore::new("prod", urls.prod, settings);
    Ok(DbSync::standard(dev, prod)?)
}
