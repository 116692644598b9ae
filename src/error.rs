use dbsync_core::{RegistryError, Side};

use crate::store::StoreError;

/// Errors that abort a sync run.
#[derive(Debug)]
pub enum SyncError {
    /// The two stores are on different migrations.
    SchemaMismatch { dev: String, prod: String },
    /// A store has no applied migration at all.
    MissingMigrations(Side),
    Store(StoreError),
    Registry(RegistryError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::SchemaMismatch { dev, prod } => write!(
                f,
                "schema version mismatch: dev is at '{}', prod is at '{}'; migrate both before syncing",
                dev, prod
            ),
            SyncError::MissingMigrations(side) => {
                write!(f, "no applied migrations found in {} database", side)
            }
            SyncError::Store(e) => write!(f, "{}", e),
            SyncError::Registry(e) => write!(f, "invalid table registry: {}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            SyncError::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<RegistryError> for SyncError {
    fn from(e: RegistryError) -> Self {
        SyncError::Registry(e)
    }
}
