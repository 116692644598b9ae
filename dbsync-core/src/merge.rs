//! Row differ and last-write-wins merger.
//!
//! Given the dev and prod snapshots of one table, decides per primary key
//! which whole row (if any) must be written to which store. Rows are never
//! merged field by field: when both sides changed different fields since the
//! last run, the newer row replaces the older one entirely.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::registry::TableConfig;
use crate::report::TableStats;
use crate::row::{Row, RowMap};
use crate::side::Direction;
use crate::tombstone::TombstoneSet;

/// Whether the target store already holds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Overwrite,
}

/// One whole-row write decided by the differ.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub key: String,
    pub direction: Direction,
    pub kind: WriteKind,
    pub row: Row,
}

/// Every write for one table, plus the counters and warnings they produced.
#[derive(Debug, Clone, Default)]
pub struct TablePlan {
    pub writes: Vec<RowWrite>,
    pub stats: TableStats,
    pub warnings: Vec<String>,
    /// Keys left alone because they are tombstoned.
    pub tombstoned: usize,
}

/// Outcome of comparing the recency field of a matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    DevNewer,
    ProdNewer,
    Same,
    /// One or both timestamps missing or unparseable.
    Unknown,
}

pub fn compare_recency(field: &str, dev: &Row, prod: &Row) -> Recency {
    match (dev.timestamp(field), prod.timestamp(field)) {
        (Some(d), Some(p)) => match d.cmp(&p) {
            Ordering::Greater => Recency::DevNewer,
            Ordering::Less => Recency::ProdNewer,
            Ordering::Equal => Recency::Same,
        },
        _ => Recency::Unknown,
    }
}

/// Diffs two snapshots of `table`.
///
/// Keys tombstoned by the table's own tombstone table are skipped.
pub fn plan_table(
    table: &TableConfig,
    dev: &RowMap,
    prod: &RowMap,
    tombstones: &TombstoneSet,
) -> TablePlan {
    let mut plan = TablePlan::default();
    // Registry validation guarantees a recency field.
    let field = table.recency_field().unwrap_or("updated_at");

    let keys: BTreeSet<&String> = dev.keys().chain(prod.keys()).collect();

    for key in keys {
        if tombstones.covers(table, key) {
            plan.tombstoned += 1;
            continue;
        }

        match (dev.get(key), prod.get(key)) {
            (Some(row), None) => {
                plan.stats.dev_to_prod += 1;
                plan.writes.push(RowWrite {
                    key: key.clone(),
                    direction: Direction::DevToProd,
                    kind: WriteKind::Insert,
                    row: row.clone(),
                });
            }
            (None, Some(row)) => {
                plan.stats.prod_to_dev += 1;
                plan.writes.push(RowWrite {
                    key: key.clone(),
                    direction: Direction::ProdToDev,
                    kind: WriteKind::Insert,
                    row: row.clone(),
                });
            }
            (Some(dev_row), Some(prod_row)) => match compare_recency(field, dev_row, prod_row) {
                Recency::DevNewer => {
                    plan.stats.dev_to_prod += 1;
                    plan.stats.conflicts += 1;
                    plan.writes.push(RowWrite {
                        key: key.clone(),
                        direction: Direction::DevToProd,
                        kind: WriteKind::Overwrite,
                        row: dev_row.clone(),
                    });
                }
                Recency::ProdNewer => {
                    plan.stats.prod_to_dev += 1;
                    plan.stats.conflicts += 1;
                    plan.writes.push(RowWrite {
                        key: key.clone(),
                        direction: Direction::ProdToDev,
                        kind: WriteKind::Overwrite,
                        row: prod_row.clone(),
                    });
                }
                Recency::Same => {}
                Recency::Unknown => plan.warnings.push(format!(
                    "{}[{}]: missing or invalid {} on one side, rows left as they are",
                    table.name, key, field
                )),
            },
            (None, None) => {}
        }
    }

    for (map, side) in [(dev, "dev"), (prod, "prod")] {
        if map.keyless > 0 {
            plan.warnings.push(format!(
                "{}: {} {} row(s) without a complete primary key were ignored",
                table.name, map.keyless, side
            ));
        }
    }

    plan
}
