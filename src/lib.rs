//! dbsync
//!
//! Bidirectional last-write-wins synchronization between the development and
//! production Postgres databases of the companion bot. The pure merge logic
//! lives in `dbsync-core`; this crate adds the stores, the orchestrator and
//! configuration.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use engine::{CheckReport, DbSync, SyncOptions};
pub use error::SyncError;
pub use store::{MemoryStore, PgStore, StoreError, SyncStore};
