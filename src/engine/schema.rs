use dbsync_core::{check_table, Registry, Side};

use crate::error::SyncError;
use crate::store::SyncStore;

/// Returns the migration both stores are on, or fails if they differ.
pub(super) async fn validate_versions<S: SyncStore>(
    dev: &S,
    prod: &S,
) -> Result<String, SyncError> {
    let dev_version = dev
        .latest_migration()
        .await?
        .ok_or(SyncError::MissingMigrations(Side::Dev))?;
    let prod_version = prod
        .latest_migration()
        .await?
        .ok_or(SyncError::MissingMigrations(Side::Prod))?;

    if dev_version != prod_version {
        return Err(SyncError::SchemaMismatch {
            dev: dev_version,
            prod: prod_version,
        });
    }

    tracing::info!("schema version: {}", dev_version);
    Ok(dev_version)
}

/// Cross-checks every registered table against both live schemas.
pub(super) async fn validate_registry<S: SyncStore>(
    registry: &Registry,
    dev: &S,
    prod: &S,
) -> Result<Vec<String>, SyncError> {
    let mut warnings = Vec::new();
    for table in registry.tables() {
        for (side, store) in [(Side::Dev, dev), (Side::Prod, prod)] {
            let columns = store.columns(table.name).await?;
            let found = check_table(table, side, &columns);
            super::log_warnings(&found);
            warnings.extend(found);
        }
    }
    Ok(warnings)
}
