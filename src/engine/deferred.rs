use dbsync_core::{plan_column, PassOneSources, Registry, RowMap, Side};
use std::collections::HashMap;

use crate::error::SyncError;
use crate::store::SyncStore;

/// Pass 2: restores deferred foreign-key columns with targeted updates now
/// that every referenced row exists in both stores.
///
/// Returns the number of column updates and any warnings.
pub(super) async fn restore<S: SyncStore>(
    registry: &Registry,
    dev: &S,
    prod: &S,
    sources: &HashMap<&'static str, PassOneSources>,
) -> Result<(usize, Vec<String>), SyncError> {
    let empty = PassOneSources::new();
    let mut updates = 0;
    let mut warnings = Vec::new();

    for table in registry.deferred_tables() {
        let dev_rows = RowMap::build(dev.fetch_rows(table).await?, &table.primary_key);
        let prod_rows = RowMap::build(prod.fetch_rows(table).await?, &table.primary_key);
        let written = sources.get(table.name).unwrap_or(&empty);
        let before = updates;

        for column in table.deferred_columns() {
            let plan = plan_column(table, column, &dev_rows, &prod_rows, written);
            super::log_warnings(&plan.warnings);
            for patch in &plan.patches {
                let store = match patch.target {
                    Side::Dev => dev,
                    Side::Prod => prod,
                };
                tracing::debug!(
                    "{}[{}]: {} -> {} in {}",
                    table.name,
                    patch.key,
                    column,
                    patch.value,
                    patch.target
                );
                store
                    .update_column(table, &patch.key_row, patch.column, &patch.value)
                    .await?;
                updates += 1;
            }
            warnings.extend(plan.warnings);
        }

        if updates > before {
            tracing::info!(
                "{}: restored {} deferred foreign key value(s)",
                table.name,
                updates - before
            );
        }
    }

    Ok((updates, warnings))
}
