//! In-process store.
//!
//! Tables are kept as primary-key indexed maps and follow the same write
//! semantics as the Postgres upsert: deferred columns are null on insert and
//! untouched on update. Every write is counted, and writes to a chosen table
//! can be made to fail.

use async_trait::async_trait;
use dbsync_core::{ColumnInfo, Registry, Row, TableConfig};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{StoreError, SyncStore};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnInfo>,
    rows: BTreeMap<String, Row>,
}

#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    migration: Option<String>,
    connected: AtomicBool,
    tables: Mutex<HashMap<String, MemoryTable>>,
    writes: AtomicUsize,
    failing_table: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, migration: Option<&str>) -> Self {
        Self {
            name: name.into(),
            migration: migration.map(str::to_string),
            connected: AtomicBool::new(false),
            tables: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            failing_table: Mutex::new(None),
        }
    }

    /// A store with every registry table defined, columns derived from the
    /// declarations.
    pub fn for_registry(
        name: impl Into<String>,
        migration: Option<&str>,
        registry: &Registry,
    ) -> Self {
        let store = Self::new(name, migration);
        for table in registry.tables() {
            store.define_table(table.name, declared_columns(table));
        }
        store
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates (or redefines the columns of) a table.
    pub fn define_table(&self, name: &str, columns: Vec<ColumnInfo>) {
        self.lock_tables().entry(name.to_string()).or_default().columns = columns;
    }

    /// Puts a row in place as-is, without counting a write.
    pub fn seed(&self, table: &TableConfig, row: Row) {
        if let Some(key) = row.key(&table.primary_key) {
            self.lock_tables()
                .entry(table.name.to_string())
                .or_default()
                .rows
                .insert(key, row);
        }
    }

    /// Every row of a table, ordered by key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock_tables()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<Row> {
        self.lock_tables()
            .get(table)
            .and_then(|t| t.rows.get(key).cloned())
    }

    /// Number of writes performed through [`SyncStore`].
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Makes every subsequent write to `table` fail.
    pub fn fail_writes_on(&self, table: &str) {
        *self.failing_table.lock().unwrap_or_else(|e| e.into_inner()) = Some(table.to_string());
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::NotConnected(self.name.clone()))
        }
    }

    /// Runs a write against `table`, honoring failure injection.
    fn write<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemoryTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.ensure_connected()?;
        let failing = self
            .failing_table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if failing.as_deref() == Some(table) {
            return Err(StoreError::Backend(
                self.name.clone(),
                format!("write to {} rejected", table),
            ));
        }

        let mut tables = self.lock_tables();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| self.missing_relation(table))?;
        let out = f(t)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }

    fn missing_relation(&self, table: &str) -> StoreError {
        StoreError::Backend(
            self.name.clone(),
            format!("relation \"{}\" does not exist", table),
        )
    }

    fn key_of(&self, table: &TableConfig, row: &Row) -> Result<String, StoreError> {
        row.key(&table.primary_key).ok_or_else(|| {
            StoreError::Backend(
                self.name.clone(),
                format!("{}: row without a complete primary key", table.name),
            )
        })
    }
}

fn declared_columns(table: &TableConfig) -> Vec<ColumnInfo> {
    let mut columns: Vec<ColumnInfo> = Vec::new();
    let mut add = |name: &str, udt: &str| {
        if !columns.iter().any(|c| c.name == name) {
            columns.push(ColumnInfo::new(name, udt));
        }
    };
    for column in &table.uuid_columns {
        add(*column, "uuid");
    }
    for column in &table.primary_key {
        add(*column, "text");
    }
    for column in &table.timestamp_columns {
        add(*column, "timestamptz");
    }
    for fk in &table.foreign_keys {
        add(fk.column, "text");
    }
    for flag in table.singleton_flags() {
        add(flag, "bool");
    }
    if let Some(vector) = table.vector_column() {
        add(vector, "vector");
    }
    columns
}

#[async_trait]
impl SyncStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), StoreError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn latest_migration(&self) -> Result<Option<String>, StoreError> {
        self.ensure_connected()?;
        Ok(self.migration.clone())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        self.ensure_connected()?;
        Ok(self
            .lock_tables()
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn fetch_rows(&self, table: &TableConfig) -> Result<Vec<Row>, StoreError> {
        self.ensure_connected()?;
        self.lock_tables()
            .get(table.name)
            .map(|t| t.rows.values().cloned().collect())
            .ok_or_else(|| self.missing_relation(table.name))
    }

    async fn upsert_row(&self, table: &TableConfig, row: &Row) -> Result<(), StoreError> {
        let key = self.key_of(table, row)?;
        self.write(table.name, |t| {
            match t.rows.get_mut(&key) {
                Some(existing) => {
                    for (column, value) in row.iter() {
                        if !table.is_deferred(column) && !table.is_primary_key(column) {
                            existing.insert(column.clone(), value.clone());
                        }
                    }
                }
                None => {
                    let inserted = row
                        .iter()
                        .map(|(column, value)| {
                            let value = if table.is_deferred(column) {
                                Value::Null
                            } else {
                                value.clone()
                            };
                            (column.clone(), value)
                        })
                        .collect();
                    t.rows.insert(key, inserted);
                }
            }
            Ok(())
        })
    }

    async fn delete_row(&self, table: &TableConfig, key_row: &Row) -> Result<(), StoreError> {
        let key = self.key_of(table, key_row)?;
        self.write(table.name, |t| {
            t.rows.remove(&key);
            Ok(())
        })
    }

    async fn update_column(
        &self,
        table: &TableConfig,
        key_row: &Row,
        column: &str,
        value: &Value,
    ) -> Result<(), StoreError> {
        let key = self.key_of(table, key_row)?;
        self.write(table.name, |t| {
            if let Some(row) = t.rows.get_mut(&key) {
                row.insert(column, value.clone());
            }
            Ok(())
        })
    }
}
