//! End-to-end sync runs over two in-memory stores.

use dbsync::engine::{DbSync, SyncOptions};
use dbsync::store::MemoryStore;
use dbsync::SyncError;
use dbsync_core::sql::ColumnTypes;
use dbsync_core::{Capability, ColumnInfo, Registry, Row, Side, TableConfig};
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

const MIGRATION: &str = "20240601120000_add_memory_embeddings";

const T0: &str = "2024-06-01T12:00:00Z";
const T5: &str = "2024-06-01T12:00:05Z";
const T10: &str = "2024-06-01T12:00:10Z";

const APPLY: SyncOptions = SyncOptions { dry_run: false };
const PREVIEW: SyncOptions = SyncOptions { dry_run: true };

fn engine(registry: Registry) -> DbSync<MemoryStore> {
    let dev = MemoryStore::for_registry("dev", Some(MIGRATION), &registry);
    let prod = MemoryStore::for_registry("prod", Some(MIGRATION), &registry);
    DbSync::new(dev, prod, registry)
}

fn standard() -> DbSync<MemoryStore> {
    engine(Registry::standard().unwrap())
}

fn seed(sync: &DbSync<MemoryStore>, side: Side, table: &str, row: Row) {
    let config = sync.registry().get(table).unwrap();
    sync.store(side).seed(config, row);
}

fn get(sync: &DbSync<MemoryStore>, side: Side, table: &str, key: &str) -> Option<Row> {
    sync.store(side).get(table, key)
}

fn writes(sync: &DbSync<MemoryStore>) -> usize {
    sync.store(Side::Dev).write_count() + sync.store(Side::Prod).write_count()
}

fn user(id: &str, name: &str, updated_at: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("name", name)
        .with("created_at", T0)
        .with("updated_at", updated_at)
}

fn persona(id: &str, owner: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("owner_id", owner)
        .with("created_at", T0)
        .with("updated_at", T0)
}

fn llm_config(id: &str, is_default: bool, updated_at: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("name", format!("config {}", id))
        .with("is_default", is_default)
        .with("is_free_default", false)
        .with("created_at", T0)
        .with("updated_at", updated_at)
}

fn history(id: &str, content: &str, updated_at: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("content", content)
        .with("created_at", T0)
        .with("updated_at", updated_at)
}

#[tokio::test]
async fn test_newer_dev_row_overwrites_prod() {
    let mut sync = standard();
    let dev_row = user("u1", "from dev", T10);
    seed(&sync, Side::Dev, "users", dev_row.clone());
    seed(&sync, Side::Prod, "users", user("u1", "from prod", T5));

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(report.schema_version, MIGRATION);
    let stats = report.stats.get("users").unwrap();
    assert_eq!(
        (stats.dev_to_prod, stats.prod_to_dev, stats.conflicts),
        (1, 0, 1)
    );
    assert_eq!(get(&sync, Side::Prod, "users", "u1"), Some(dev_row.clone()));
    assert_eq!(get(&sync, Side::Dev, "users", "u1"), Some(dev_row));
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_equal_timestamps_write_nothing() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", T5));
    seed(&sync, Side::Prod, "users", user("u1", "prod", T5));

    let report = sync.sync(APPLY).await.unwrap();

    assert!(report.stats.is_zero());
    assert_eq!(writes(&sync), 0);
    let prod = get(&sync, Side::Prod, "users", "u1").unwrap();
    assert_eq!(prod.get("name"), Some(&json!("prod")));
}

#[tokio::test]
async fn test_invalid_timestamp_is_left_alone_with_warning() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", "not a timestamp"));
    seed(&sync, Side::Prod, "users", user("u1", "prod", T5));

    let report = sync.sync(APPLY).await.unwrap();

    assert!(report.stats.is_zero());
    assert_eq!(writes(&sync), 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("users[u1]"));
}

#[tokio::test]
async fn test_singleton_flag_kept_on_newest_row_in_both_stores() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "llm_configs", llm_config("a", true, T10));
    seed(&sync, Side::Prod, "llm_configs", llm_config("b", true, T5));

    let report = sync.sync(APPLY).await.unwrap();

    let stats = report.stats.get("llm_configs").unwrap();
    assert_eq!((stats.dev_to_prod, stats.prod_to_dev), (1, 1));
    assert_eq!(report.singleton_clears, 2);
    for side in [Side::Dev, Side::Prod] {
        let a = get(&sync, side, "llm_configs", "a").unwrap();
        let b = get(&sync, side, "llm_configs", "b").unwrap();
        assert!(a.flag("is_default"), "a lost is_default in {}", side);
        assert!(!b.flag("is_default"), "b kept is_default in {}", side);
    }
}

#[tokio::test]
async fn test_singleton_flags_are_resolved_independently() {
    let mut sync = standard();
    seed(
        &sync,
        Side::Dev,
        "llm_configs",
        llm_config("a", true, T10).with("is_free_default", true),
    );
    seed(
        &sync,
        Side::Prod,
        "llm_configs",
        llm_config("b", false, T5).with("is_free_default", true),
    );

    let report = sync.sync(APPLY).await.unwrap();

    // only is_free_default was contested
    assert_eq!(report.singleton_clears, 2);
    for side in [Side::Dev, Side::Prod] {
        let a = get(&sync, side, "llm_configs", "a").unwrap();
        let b = get(&sync, side, "llm_configs", "b").unwrap();
        assert!(a.flag("is_default") && a.flag("is_free_default"));
        assert!(!b.flag("is_default") && !b.flag("is_free_default"));
    }
}

#[tokio::test]
async fn test_composite_key_row_inserted_into_prod() {
    let pairs = TableConfig::new("pairs")
        .with_primary_key(&["col_x", "col_y"])
        .with_timestamps(&["created_at"]);
    let mut sync = engine(Registry::new(vec![pairs.clone()]).unwrap());
    let row = Row::new()
        .with("col_x", 5)
        .with("col_y", "a")
        .with("label", "only in dev")
        .with("created_at", T0);
    seed(&sync, Side::Dev, "pairs", row.clone());

    let report = sync.sync(APPLY).await.unwrap();

    let stats = report.stats.get("pairs").unwrap();
    assert_eq!(
        (stats.dev_to_prod, stats.prod_to_dev, stats.conflicts),
        (1, 0, 0)
    );
    assert_eq!(get(&sync, Side::Prod, "pairs", "5|a"), Some(row.clone()));

    let statement = dbsync_core::sql::upsert(&pairs, &row, &ColumnTypes::new());
    assert!(statement.sql.contains("ON CONFLICT (\"col_x\", \"col_y\")"));
}

#[tokio::test]
async fn test_composite_keys_containing_the_separator_stay_distinct() {
    let pairs = TableConfig::new("pairs")
        .with_primary_key(&["col_x", "col_y"])
        .with_timestamps(&["created_at"]);
    let mut sync = engine(Registry::new(vec![pairs]).unwrap());
    let left = Row::new()
        .with("col_x", "x|y")
        .with("col_y", "z")
        .with("created_at", T0);
    let right = Row::new()
        .with("col_x", "x")
        .with("col_y", "y|z")
        .with("created_at", T0);
    seed(&sync, Side::Dev, "pairs", left.clone());
    seed(&sync, Side::Dev, "pairs", right.clone());

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(report.stats.get("pairs").unwrap().dev_to_prod, 2);
    assert_eq!(sync.store(Side::Prod).rows("pairs"), vec![left, right]);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let mut sync = standard();
    seed(
        &sync,
        Side::Dev,
        "users",
        user("u1", "dev", T10).with("default_persona_id", "p1"),
    );
    seed(&sync, Side::Prod, "users", user("u1", "prod", T5));
    seed(&sync, Side::Prod, "users", user("u2", "prod only", T5));
    seed(&sync, Side::Dev, "personas", persona("p1", "u1"));
    seed(&sync, Side::Dev, "llm_configs", llm_config("a", true, T10));
    seed(&sync, Side::Prod, "llm_configs", llm_config("b", true, T5));
    seed(
        &sync,
        Side::Prod,
        "conversation_history",
        history("h1", "hello", T5),
    );

    let first = sync.sync(APPLY).await.unwrap();
    assert!(!first.stats.is_zero());
    let after_first = writes(&sync);

    let second = sync.sync(APPLY).await.unwrap();
    assert!(second.stats.is_zero());
    assert_eq!(second.singleton_clears, 0);
    assert_eq!(second.deferred_updates, 0);
    assert_eq!(writes(&sync), after_first);

    let registry = Registry::standard().unwrap();
    for table in registry.tables() {
        assert_eq!(
            sync.store(Side::Dev).rows(table.name),
            sync.store(Side::Prod).rows(table.name),
            "{} differs after sync",
            table.name
        );
    }
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", T10));
    seed(&sync, Side::Prod, "users", user("u1", "prod", T5));
    seed(&sync, Side::Dev, "llm_configs", llm_config("a", true, T10));
    seed(&sync, Side::Prod, "llm_configs", llm_config("b", true, T5));
    seed(
        &sync,
        Side::Dev,
        "conversation_history_tombstones",
        Row::new()
            .with("id", "h1")
            .with("created_at", T5)
            .with("deleted_at", T5),
    );
    seed(
        &sync,
        Side::Prod,
        "conversation_history",
        history("h1", "deleted in dev", T0),
    );

    let report = sync.sync(PREVIEW).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(writes(&sync), 0);
    let users = report.stats.get("users").unwrap();
    assert_eq!((users.dev_to_prod, users.conflicts), (1, 1));
    assert_eq!(report.stats.get("llm_configs").unwrap().prod_to_dev, 1);
    assert_eq!(report.singleton_clears, 0);
    assert_eq!(report.deferred_updates, 0);

    let prod = get(&sync, Side::Prod, "users", "u1").unwrap();
    assert_eq!(prod.get("name"), Some(&json!("prod")));
    assert!(get(&sync, Side::Prod, "conversation_history", "h1").is_some());
}

#[tokio::test]
async fn test_tombstoned_history_is_deleted_and_not_resurrected() {
    let mut sync = standard();
    seed(
        &sync,
        Side::Prod,
        "conversation_history_tombstones",
        Row::new()
            .with("id", "h1")
            .with("created_at", T5)
            .with("deleted_at", T5),
    );
    // dev still has the row, edited after the delete in prod
    seed(
        &sync,
        Side::Dev,
        "conversation_history",
        history("h1", "stale copy", T10),
    );
    seed(
        &sync,
        Side::Dev,
        "conversation_history",
        history("h2", "kept", T0),
    );

    let report = sync.sync(APPLY).await.unwrap();

    for side in [Side::Dev, Side::Prod] {
        assert!(get(&sync, side, "conversation_history", "h1").is_none());
        assert!(get(&sync, side, "conversation_history_tombstones", "h1").is_some());
    }
    assert!(get(&sync, Side::Prod, "conversation_history", "h2").is_some());

    let history_stats = report.stats.get("conversation_history").unwrap();
    assert_eq!(
        (history_stats.dev_to_prod, history_stats.prod_to_dev),
        (1, 0)
    );
    assert_eq!(
        report
            .stats
            .get("conversation_history_tombstones")
            .unwrap()
            .prod_to_dev,
        1
    );

    let again = sync.sync(APPLY).await.unwrap();
    assert!(again.stats.is_zero());
}

#[tokio::test]
async fn test_tombstones_only_apply_to_their_governed_table() {
    let registry = Registry::new(vec![
        TableConfig::new("note_tombstones").with_timestamps(&["created_at"]),
        TableConfig::new("task_tombstones").with_timestamps(&["created_at"]),
        TableConfig::new("notes")
            .with_timestamps(&["created_at"])
            .with_capability(Capability::TombstonedBy("note_tombstones")),
        TableConfig::new("tasks")
            .with_timestamps(&["created_at"])
            .with_capability(Capability::TombstonedBy("task_tombstones")),
    ])
    .unwrap();
    let mut sync = engine(registry);
    let row = Row::new().with("id", "k1").with("created_at", T0);
    seed(&sync, Side::Prod, "note_tombstones", row.clone());
    seed(&sync, Side::Dev, "notes", row.clone());
    seed(&sync, Side::Dev, "tasks", row.clone());

    sync.sync(APPLY).await.unwrap();

    assert!(get(&sync, Side::Dev, "notes", "k1").is_none());
    assert!(get(&sync, Side::Prod, "notes", "k1").is_none());
    assert_eq!(get(&sync, Side::Prod, "tasks", "k1"), Some(row));
}

#[tokio::test]
async fn test_deferred_foreign_keys_restored_in_second_pass() {
    let mut sync = standard();
    seed(
        &sync,
        Side::Dev,
        "users",
        user("u1", "alice", T5).with("default_persona_id", "p1"),
    );
    seed(&sync, Side::Dev, "personas", persona("p1", "u1"));
    seed(
        &sync,
        Side::Dev,
        "personalities",
        Row::new()
            .with("id", "child")
            .with("forked_from_id", "parent")
            .with("created_at", T0)
            .with("updated_at", T0),
    );
    seed(
        &sync,
        Side::Dev,
        "personalities",
        Row::new()
            .with("id", "parent")
            .with("forked_from_id", Value::Null)
            .with("created_at", T0)
            .with("updated_at", T0),
    );

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(report.deferred_updates, 2);
    let u1 = get(&sync, Side::Prod, "users", "u1").unwrap();
    assert_eq!(u1.get("default_persona_id"), Some(&json!("p1")));
    let child = get(&sync, Side::Prod, "personalities", "child").unwrap();
    assert_eq!(child.get("forked_from_id"), Some(&json!("parent")));
}

#[tokio::test]
async fn test_deferred_column_follows_overwriting_row() {
    let mut sync = standard();
    for side in [Side::Dev, Side::Prod] {
        seed(&sync, side, "personas", persona("p_old", "u9"));
        seed(&sync, side, "personas", persona("p_new", "u9"));
    }
    seed(
        &sync,
        Side::Dev,
        "users",
        user("u1", "renamed", T10).with("default_persona_id", "p_new"),
    );
    seed(
        &sync,
        Side::Prod,
        "users",
        user("u1", "original", T5).with("default_persona_id", "p_old"),
    );

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(report.deferred_updates, 1);
    assert!(report.warnings.is_empty());
    let prod = get(&sync, Side::Prod, "users", "u1").unwrap();
    assert_eq!(prod.get("name"), Some(&json!("renamed")));
    assert_eq!(prod.get("default_persona_id"), Some(&json!("p_new")));
}

#[tokio::test]
async fn test_schema_mismatch_aborts_before_any_write() {
    let registry = Registry::standard().unwrap();
    let dev = MemoryStore::for_registry("dev", Some("20240701000000_next"), &registry);
    let prod = MemoryStore::for_registry("prod", Some(MIGRATION), &registry);
    let mut sync = DbSync::new(dev, prod, registry);
    seed(&sync, Side::Dev, "users", user("u1", "dev", T10));

    let err = sync.sync(APPLY).await.unwrap_err();

    match err {
        SyncError::SchemaMismatch { dev, prod } => {
            assert_eq!(dev, "20240701000000_next");
            assert_eq!(prod, MIGRATION);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(writes(&sync), 0);
    assert!(get(&sync, Side::Prod, "users", "u1").is_none());
    assert!(!sync.store(Side::Dev).is_connected());
    assert!(!sync.store(Side::Prod).is_connected());
}

#[tokio::test]
async fn test_missing_migration_history_is_fatal() {
    let registry = Registry::standard().unwrap();
    let dev = MemoryStore::for_registry("dev", Some(MIGRATION), &registry);
    let prod = MemoryStore::for_registry("prod", None, &registry);
    let mut sync = DbSync::new(dev, prod, registry);

    let err = sync.sync(APPLY).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingMigrations(Side::Prod)));
}

#[tokio::test]
async fn test_write_failure_propagates_and_releases_stores() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", T5));
    seed(&sync, Side::Dev, "personas", persona("p1", "u1"));
    sync.store(Side::Prod).fail_writes_on("personas");

    let err = sync.sync(APPLY).await.unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
    assert!(err.to_string().contains("personas"));
    // tables before the failure stay written; a rerun finishes the job
    assert!(get(&sync, Side::Prod, "users", "u1").is_some());
    assert!(get(&sync, Side::Prod, "personas", "p1").is_none());
    assert!(!sync.store(Side::Dev).is_connected());
    assert!(!sync.store(Side::Prod).is_connected());
}

#[tokio::test]
async fn test_schema_drift_is_reported_but_sync_continues() {
    let mut sync = standard();
    sync.store(Side::Prod).define_table(
        "llm_configs",
        vec![
            ColumnInfo::new("id", "uuid"),
            ColumnInfo::new("owner_id", "uuid"),
            ColumnInfo::new("is_default", "bool"),
            ColumnInfo::new("created_at", "timestamptz"),
            ColumnInfo::new("updated_at", "timestamptz"),
        ],
    );
    seed(&sync, Side::Dev, "users", user("u1", "dev", T5));

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("'is_free_default'"));
    assert!(report.warnings[0].contains("prod schema"));
    assert!(get(&sync, Side::Prod, "users", "u1").is_some());
}

#[tokio::test]
async fn test_undeclared_uuid_column_is_synced_with_a_warning() {
    let notes = TableConfig::new("notes")
        .with_uuids(&["id"])
        .with_timestamps(&["created_at", "updated_at"]);
    let mut sync = engine(Registry::new(vec![notes]).unwrap());
    let columns = vec![
        ColumnInfo::new("id", "uuid"),
        ColumnInfo::new("owner_id", "uuid"),
        ColumnInfo::new("created_at", "timestamptz"),
        ColumnInfo::new("updated_at", "timestamptz"),
    ];
    for side in [Side::Dev, Side::Prod] {
        sync.store(side).define_table("notes", columns.clone());
    }
    let id = "6f1c2a52-8f1e-4c55-9d3a-0b7f1e2d3c4b";
    let row = Row::new()
        .with("id", id)
        .with("owner_id", "0d5e8a3c-1b2f-4a6d-9e7f-112233445566")
        .with("created_at", T0)
        .with("updated_at", T5);
    seed(&sync, Side::Dev, "notes", row.clone());

    let report = sync.sync(APPLY).await.unwrap();

    assert_eq!(get(&sync, Side::Prod, "notes", id), Some(row));
    assert_eq!(report.warnings.len(), 2);
    assert!(report
        .warnings
        .iter()
        .all(|w| w.contains("'owner_id'") && w.contains("not declared in the registry")));
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = CapturedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_warnings_are_logged_before_a_later_failure() {
    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", "not a timestamp"));
    seed(&sync, Side::Prod, "users", user("u1", "prod", T5));
    seed(&sync, Side::Dev, "personas", persona("p1", "u1"));
    sync.store(Side::Prod).fail_writes_on("personas");

    assert!(sync.sync(APPLY).await.is_err());

    let output = log.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("users[u1]"));
}

#[tokio::test]
async fn test_check_reports_version_without_writing() {
    let mut sync = standard();
    seed(&sync, Side::Dev, "users", user("u1", "dev", T5));

    let report = sync.check().await.unwrap();

    assert_eq!(report.schema_version, MIGRATION);
    assert!(report.warnings.is_empty());
    assert_eq!(writes(&sync), 0);
    assert!(!sync.store(Side::Dev).is_connected());
}
