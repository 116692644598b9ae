//! Postgres store backed by an sqlx connection pool.
//!
//! Rows are read generically: every column is decoded into a JSON value by
//! its Postgres type. Columns of types without a decoder here (vector,
//! numeric, bytea, enums, non-text arrays, ...) are selected cast to text, and
//! writes cast every parameter back to the column's live type. Live column
//! types are read from the catalog once per table and connection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dbsync_core::sql::{self, ColumnTypes, SqlParam, Statement};
use dbsync_core::{format_timestamp, ColumnInfo, Row, TableConfig};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::{Column, Row as _, TypeInfo};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{StoreError, SyncStore};

/// Pool sizing for one store.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub struct PgStore {
    name: String,
    url: String,
    settings: PoolSettings,
    pool: Option<PgPool>,
    column_cache: Mutex<HashMap<String, Vec<ColumnInfo>>>,
}

impl PgStore {
    /// Creates an unconnected store for `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>, settings: PoolSettings) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            settings,
            pool: None,
            column_cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached_columns(&self) -> MutexGuard<'_, HashMap<String, Vec<ColumnInfo>>> {
        self.column_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live columns of `table`, from the cache or the catalog.
    async fn live_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let cached = self.cached_columns().get(table).cloned();
        match cached {
            Some(columns) => Ok(columns),
            None => self.columns(table).await,
        }
    }

    async fn column_types(&self, table: &str) -> Result<ColumnTypes, StoreError> {
        let columns = self.live_columns(table).await?;
        Ok(ColumnTypes::from(columns.as_slice()))
    }

    fn pool(&self) -> Result<&PgPool, StoreError> {
        self.pool
            .as_ref()
            .ok_or_else(|| StoreError::NotConnected(self.name.clone()))
    }

    fn db_err(&self, e: sqlx::Error) -> StoreError {
        StoreError::Database(self.name.clone(), e)
    }

    async fn execute(&self, statement: Statement) -> Result<u64, StoreError> {
        let pool = self.pool()?;
        tracing::debug!("{}: {}", self.name, statement.sql);

        let mut query = sqlx::query(&statement.sql);
        for param in statement.params {
            query = match param {
                SqlParam::Text(s) => query.bind(s),
                SqlParam::Bool(b) => query.bind(b),
                SqlParam::Int(i) => query.bind(i),
                SqlParam::Float(f) => query.bind(f),
                SqlParam::TextArray(items) => query.bind(items),
                SqlParam::Json(v) => query.bind(sqlx::types::Json(v)),
            };
        }

        let result = query.execute(pool).await.map_err(|e| self.db_err(e))?;
        Ok(result.rows_affected())
    }

    fn decode_row(&self, table: &TableConfig, row: &PgRow) -> Result<Row, StoreError> {
        let mut out = Row::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let type_info = column.type_info();
            let type_name = type_info.name();
            let value = decode_value(row, idx, type_info)
                .map_err(|e| self.db_err(e))?
                .ok_or_else(|| StoreError::UnsupportedType {
                    store: self.name.clone(),
                    table: table.name.to_string(),
                    column: column.name().to_string(),
                    type_name: type_name.to_string(),
                })?;
            out.insert(column.name(), value);
        }
        Ok(out)
    }
}

/// Decodes one column into JSON. `Ok(None)` means the type is not supported.
fn decode_value(
    row: &PgRow,
    idx: usize,
    type_info: &PgTypeInfo,
) -> Result<Option<Value>, sqlx::Error> {
    let value = match type_info.name() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(Value::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|dt| Value::String(format_timestamp(&dt))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|dt| Value::String(format_timestamp(&dt.and_utc()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::String(d.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx)?.map(Value::from)
        }
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<Option<String>>>, _>(idx)?
            .map(Value::from),
        "UUID[]" => row.try_get::<Option<Vec<Option<Uuid>>>, _>(idx)?.map(|ids| {
            Value::from(
                ids.iter()
                    .map(|id| id.map(|u| u.to_string()))
                    .collect::<Vec<_>>(),
            )
        }),
        // enum labels arrive as UTF-8 text
        _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => row
            .try_get_unchecked::<Option<String>, _>(idx)?
            .map(Value::from),
        _ => return Ok(None),
    };
    Ok(Some(value.unwrap_or(Value::Null)))
}

#[async_trait]
impl SyncStore for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), StoreError> {
        if self.pool.is_some() {
            return Ok(());
        }

        let options = PgConnectOptions::from_str(&self.url)
            .map_err(|e| self.db_err(e))?
            .options([("timezone", "UTC")]);

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| self.db_err(e))?;

        tracing::info!("{}: connected", self.name);
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.cached_columns().clear();
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::info!("{}: disconnected", self.name);
        }
    }

    async fn latest_migration(&self) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(sql::LATEST_MIGRATION)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| self.db_err(e))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(sql::TABLE_COLUMNS)
            .bind(table)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| self.db_err(e))?;

        let columns: Vec<ColumnInfo> = rows
            .into_iter()
            .map(|(name, udt_name)| ColumnInfo::new(name, udt_name))
            .collect();
        self.cached_columns()
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    async fn fetch_rows(&self, table: &TableConfig) -> Result<Vec<Row>, StoreError> {
        let columns = self.live_columns(table.name).await?;
        let query = sql::select_rows(table, &columns);

        let mut rows = Vec::new();
        let mut stream = sqlx::query(&query).fetch(self.pool()?);
        while let Some(row) = stream.try_next().await.map_err(|e| self.db_err(e))? {
            rows.push(self.decode_row(table, &row)?);
        }

        tracing::debug!("{}: read {} row(s) from {}", self.name, rows.len(), table.name);
        Ok(rows)
    }

    async fn upsert_row(&self, table: &TableConfig, row: &Row) -> Result<(), StoreError> {
        let types = self.column_types(table.name).await?;
        self.execute(sql::upsert(table, row, &types)).await.map(|_| ())
    }

    async fn delete_row(&self, table: &TableConfig, key_row: &Row) -> Result<(), StoreError> {
        let types = self.column_types(table.name).await?;
        self.execute(sql::delete_row(table, key_row, &types))
            .await
            .map(|_| ())
    }

    async fn update_column(
        &self,
        table: &TableConfig,
        key_row: &Row,
        column: &str,
        value: &Value,
    ) -> Result<(), StoreError> {
        let types = self.column_types(table.name).await?;
        self.execute(sql::update_column(table, key_row, column, value, &types))
            .await
            .map(|_| ())
    }
}
