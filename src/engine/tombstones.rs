use dbsync_core::{Registry, RowMap, TableConfig, TombstoneSet};

use crate::error::SyncError;
use crate::store::SyncStore;

/// Union of the tombstones held by both stores, kept per tombstone table,
/// for every tombstone table the registry refers to.
pub(super) async fn load<S: SyncStore>(
    registry: &Registry,
    dev: &S,
    prod: &S,
) -> Result<TombstoneSet, SyncError> {
    let mut set = TombstoneSet::new();
    let mut loaded: Vec<&str> = Vec::new();
    for governed in registry.tables() {
        let Some(name) = governed.tombstone_table() else {
            continue;
        };
        let Some(table) = registry.get(name) else {
            continue;
        };
        if loaded.contains(&name) {
            continue;
        }
        loaded.push(name);
        for store in [dev, prod] {
            let rows = store.fetch_rows(table).await?;
            set.extend_from_rows(table, &rows);
        }
    }
    tracing::info!("loaded {} tombstone(s)", set.len());
    Ok(set)
}

/// Hard-deletes every row of `rows` whose key is tombstoned by `table`'s
/// tombstone table.
pub(super) async fn purge<S: SyncStore>(
    table: &TableConfig,
    tombstones: &TombstoneSet,
    store: &S,
    rows: &RowMap,
) -> Result<usize, SyncError> {
    let mut deleted = 0;
    for (key, row) in rows.rows() {
        if tombstones.covers(table, key) {
            store
                .delete_row(table, &row.project(&table.primary_key))
                .await?;
            deleted += 1;
        }
    }
    if deleted > 0 {
        tracing::info!(
            "{}: deleted {} tombstoned row(s) from {}",
            table.name,
            deleted,
            store.name()
        );
    }
    Ok(deleted)
}
