//! Store handles the engine reads from and writes to.
//!
//! A [`SyncStore`] is one database (dev or prod) seen through the handful of
//! operations the synchronizer needs. [`PgStore`] talks to Postgres;
//! [`MemoryStore`] keeps tables in process and backs the test suite.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, PoolSettings};

use async_trait::async_trait;
use dbsync_core::{ColumnInfo, Row, TableConfig};
use serde_json::Value;

/// Operations the synchronizer performs against one database.
///
/// `connect` must be called before any other operation and `disconnect`
/// releases everything `connect` acquired. Reads and writes are issued one at
/// a time and each is awaited before the next begins.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Label used in logs and errors.
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Releases the connection. Never fails; problems are logged.
    async fn disconnect(&mut self);

    /// Identifier of the latest applied migration, if any.
    async fn latest_migration(&self) -> Result<Option<String>, StoreError>;

    /// Live columns of `table`; empty when the table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError>;

    /// Every row of `table`.
    async fn fetch_rows(&self, table: &TableConfig) -> Result<Vec<Row>, StoreError>;

    /// Insert-or-update of a whole row, writing deferred columns as null on
    /// insert and never touching them on update.
    async fn upsert_row(&self, table: &TableConfig, row: &Row) -> Result<(), StoreError>;

    /// Deletes the row whose primary key matches `key_row`.
    async fn delete_row(&self, table: &TableConfig, key_row: &Row) -> Result<(), StoreError>;

    /// Sets one column of the row whose primary key matches `key_row`.
    async fn update_column(
        &self,
        table: &TableConfig,
        key_row: &Row,
        column: &str,
        value: &Value,
    ) -> Result<(), StoreError>;
}

/// Errors raised by a store.
#[derive(Debug)]
pub enum StoreError {
    /// Operation attempted before `connect`.
    NotConnected(String),
    /// Error reported by the database driver.
    Database(String, sqlx::Error),
    /// A column whose type the generic row reader cannot represent.
    UnsupportedType {
        store: String,
        table: String,
        column: String,
        type_name: String,
    },
    /// Any other backend failure.
    Backend(String, String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotConnected(store) => write!(f, "{}: not connected", store),
            StoreError::Database(store, e) => write!(f, "{}: database error: {}", store, e),
            StoreError::UnsupportedType {
                store,
                table,
                column,
                type_name,
            } => write!(
                f,
                "{}: cannot read {}.{} of type '{}'",
                store, table, column, type_name
            ),
            StoreError::Backend(store, e) => write!(f, "{}: {}", store, e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(_, e) => Some(e),
            _ => None,
        }
    }
}
