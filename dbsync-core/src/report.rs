//! Sync statistics and the result of one run.

use serde::{Serialize, Serializer};

/// Per-table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub dev_to_prod: usize,
    pub prod_to_dev: usize,
    pub conflicts: usize,
}

impl TableStats {
    pub fn is_zero(&self) -> bool {
        *self == TableStats::default()
    }
}

/// Counters for every table, in sync order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    tables: Vec<(String, TableStats)>,
}

impl Serialize for SyncStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.tables.iter().map(|(name, stats)| (name, stats)))
    }
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, table: &str, stats: TableStats) {
        match self.tables.iter_mut().find(|(name, _)| name == table) {
            Some((_, existing)) => *existing = stats,
            None => self.tables.push((table.to_string(), stats)),
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableStats> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, stats)| stats)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableStats)> {
        self.tables.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn total(&self) -> TableStats {
        self.tables
            .iter()
            .fold(TableStats::default(), |mut acc, (_, s)| {
                acc.dev_to_prod += s.dev_to_prod;
                acc.prod_to_dev += s.prod_to_dev;
                acc.conflicts += s.conflicts;
                acc
            })
    }

    pub fn is_zero(&self) -> bool {
        self.tables.iter().all(|(_, s)| s.is_zero())
    }
}

/// What a call to `sync` did (or, in a dry run, would do).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub schema_version: String,
    pub dry_run: bool,
    pub stats: SyncStats,
    /// Targeted column updates made by the deferred foreign-key pass.
    pub deferred_updates: usize,
    /// Rows whose singleton flag was cleared.
    pub singleton_clears: usize,
    pub warnings: Vec<String>,
}
