//! Hard-delete tombstones.

use std::collections::{HashMap, HashSet};

use crate::registry::TableConfig;
use crate::row::Row;

/// Keys of rows that were intentionally hard-deleted and must never be
/// recreated by sync, grouped by tombstone table. Loaded once per run from
/// both stores.
#[derive(Debug, Clone, Default)]
pub struct TombstoneSet {
    keys: HashMap<String, HashSet<String>>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the key of every tombstone row, using the tombstone table's primary key.
    pub fn extend_from_rows(&mut self, tombstones: &TableConfig, rows: &[Row]) {
        self.keys
            .entry(tombstones.name.to_string())
            .or_default()
            .extend(rows.iter().filter_map(|r| r.key(&tombstones.primary_key)));
    }

    pub fn insert(&mut self, tombstone_table: &str, key: impl Into<String>) -> bool {
        self.keys
            .entry(tombstone_table.to_string())
            .or_default()
            .insert(key.into())
    }

    pub fn contains(&self, tombstone_table: &str, key: &str) -> bool {
        self.keys
            .get(tombstone_table)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Whether `key` of `table` is tombstoned by the table that governs it.
    /// Always false for tables without a tombstone table.
    pub fn covers(&self, table: &TableConfig, key: &str) -> bool {
        table
            .tombstone_table()
            .is_some_and(|tombstones| self.contains(tombstones, key))
    }

    pub fn len(&self) -> usize {
        self.keys.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
