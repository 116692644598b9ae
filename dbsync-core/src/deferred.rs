//! Second pass for deferred foreign-key columns.
//!
//! Pass 1 writes deferred columns as null so an insert never references a row
//! the target store does not have yet. Once every table has been merged, each
//! deferred column is compared key by key and the authoritative value is
//! pushed to the other store with a targeted column update.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::merge::{compare_recency, Recency};
use crate::registry::TableConfig;
use crate::row::{Row, RowMap};
use crate::side::Side;

/// A single-column update to apply to one store.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPatch {
    pub target: Side,
    pub key: String,
    pub key_row: Row,
    pub column: &'static str,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DeferredPlan {
    pub patches: Vec<ColumnPatch>,
    pub warnings: Vec<String>,
}

/// Keys written during pass 1, mapped to the store the winning row came from.
pub type PassOneSources = BTreeMap<String, Side>;

/// Decides the patches for one deferred column.
///
/// A key written in pass 1 takes its value from the store that supplied the
/// row, since that write already equalized the recency field. For any other
/// key the side with the newer recency wins. When recency cannot separate the two
/// rows, a non-null value wins over null, since null is what pass 1 leaves
/// behind on freshly inserted rows. Two different non-null values with equal
/// recency are reported and left alone.
pub fn plan_column(
    table: &TableConfig,
    column: &'static str,
    dev: &RowMap,
    prod: &RowMap,
    sources: &PassOneSources,
) -> DeferredPlan {
    let mut plan = DeferredPlan::default();
    let field = table.recency_field().unwrap_or("updated_at");

    for (key, dev_row) in dev.rows() {
        let Some(prod_row) = prod.get(key) else {
            continue;
        };
        let dev_value = dev_row.get(column).cloned().unwrap_or(Value::Null);
        let prod_value = prod_row.get(column).cloned().unwrap_or(Value::Null);
        if dev_value == prod_value {
            continue;
        }

        let recency = match sources.get(key) {
            Some(Side::Dev) => Recency::DevNewer,
            Some(Side::Prod) => Recency::ProdNewer,
            None => compare_recency(field, dev_row, prod_row),
        };
        let (target, value) = match recency {
            Recency::DevNewer => (Side::Prod, dev_value),
            Recency::ProdNewer => (Side::Dev, prod_value),
            Recency::Same | Recency::Unknown => {
                if prod_value.is_null() {
                    (Side::Prod, dev_value)
                } else if dev_value.is_null() {
                    (Side::Dev, prod_value)
                } else {
                    plan.warnings.push(format!(
                        "{}[{}]: {} differs between stores with equal {}, left as is",
                        table.name, key, column, field
                    ));
                    continue;
                }
            }
        };

        plan.patches.push(ColumnPatch {
            target,
            key: key.clone(),
            key_row: dev_row.project(&table.primary_key),
            column,
            value,
        });
    }

    plan
}
