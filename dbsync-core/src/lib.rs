//! dbsync core library
//!
//! Pure, I/O-free pieces of the dev/prod database synchronizer: the table
//! registry, the row model, the last-write-wins differ, the singleton-flag and
//! deferred foreign-key decisions, and the SQL statements the Postgres store
//! runs.

pub mod deferred;
pub mod merge;
pub mod registry;
pub mod report;
pub mod row;
pub mod schema;
pub mod side;
pub mod singleton;
pub mod sql;
pub mod tombstone;

pub use deferred::{plan_column, ColumnPatch, DeferredPlan, PassOneSources};
pub use merge::{compare_recency, plan_table, Recency, RowWrite, TablePlan, WriteKind};
pub use registry::{Capability, ForeignKey, Registry, RegistryError, TableConfig};
pub use report::{SyncReport, SyncStats, TableStats};
pub use row::{format_timestamp, parse_timestamp, Row, RowMap};
pub use schema::{check_table, ColumnInfo};
pub use side::{Direction, Side};
pub use singleton::{FlagClear, FlagHolder, FlagResolution};
pub use sql::{ColumnTypes, SqlParam, Statement};
pub use tombstone::TombstoneSet;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
