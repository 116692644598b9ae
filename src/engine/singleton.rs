use dbsync_core::singleton::{collect_holders, resolve};
use dbsync_core::{Registry, Side};
use serde_json::Value;

use crate::error::SyncError;
use crate::store::SyncStore;

/// Leaves every singleton flag set on at most one key, the same key in both
/// stores. Reads live rows, so it sees the state pass 1 produced.
///
/// Returns the number of cleared rows.
pub(super) async fn reconcile<S: SyncStore>(
    registry: &Registry,
    dev: &S,
    prod: &S,
) -> Result<usize, SyncError> {
    let mut cleared = 0;

    for (table, flag) in registry.singleton_flags() {
        let dev_rows = dev.fetch_rows(table).await?;
        let prod_rows = prod.fetch_rows(table).await?;

        let mut holders = collect_holders(table, flag, Side::Dev, &dev_rows);
        holders.extend(collect_holders(table, flag, Side::Prod, &prod_rows));

        let resolution = resolve(&holders);
        if resolution.clears.is_empty() {
            continue;
        }

        tracing::info!(
            "{}.{}: held by more than one row, keeping it on {}",
            table.name,
            flag,
            resolution.winner.as_deref().unwrap_or("none")
        );

        for clear in &resolution.clears {
            let store = match clear.side {
                Side::Dev => dev,
                Side::Prod => prod,
            };
            tracing::info!(
                "{}[{}]: clearing {} in {}",
                table.name,
                clear.key,
                flag,
                clear.side
            );
            store
                .update_column(table, &clear.key_row, flag, &Value::Bool(false))
                .await?;
            cleared += 1;
        }
    }

    Ok(cleared)
}
