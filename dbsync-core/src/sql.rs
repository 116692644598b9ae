//! Parameterized Postgres statements used by the sync engine.
//!
//! Every parameter is cast to the live type of the column it is written to,
//! as reported by the store's catalog in [`ColumnTypes`]. json and jsonb
//! columns take a JSON parameter, array columns a text array, and every other
//! type a text parameter cast with `$n::<type>`. Columns missing from the
//! catalog fall back to the registry's UUID, timestamp and vector casts.
//! Timestamps are rewritten to one canonical UTC form, deferred columns are
//! written as `NULL`, and nulls are inlined as `NULL` literals.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::registry::TableConfig;
use crate::row::{format_timestamp, parse_timestamp, Row};
use crate::schema::ColumnInfo;

/// Latest applied, not rolled back, Prisma migration.
pub const LATEST_MIGRATION: &str = "SELECT migration_name FROM _prisma_migrations \
     WHERE finished_at IS NOT NULL AND rolled_back_at IS NULL \
     ORDER BY finished_at DESC, migration_name DESC LIMIT 1";

/// Columns of one table in the public schema, bound with the table name.
pub const TABLE_COLUMNS: &str = "SELECT column_name::text, udt_name::text \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    TextArray(Vec<Option<String>>),
    Json(Value),
}

/// SQL text plus its parameters in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Live column types of one table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTypes(HashMap<String, String>);

impl ColumnTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[ColumnInfo]> for ColumnTypes {
    fn from(columns: &[ColumnInfo]) -> Self {
        Self(
            columns
                .iter()
                .map(|c| (c.name.clone(), c.udt_name.clone()))
                .collect(),
        )
    }
}

/// Double-quotes an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A type name usable after `::`. Plain lowercase names are left bare.
fn type_ident(udt: &str) -> String {
    let plain = !udt.is_empty()
        && udt
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        udt.to_string()
    } else {
        quote_ident(udt)
    }
}

/// Types the Postgres row reader decodes directly. Anything else is
/// selected as text and cast back to its type on write.
fn reads_natively(udt: &str) -> bool {
    matches!(
        udt,
        "bool"
            | "int2"
            | "int4"
            | "int8"
            | "float4"
            | "float8"
            | "uuid"
            | "timestamptz"
            | "timestamp"
            | "date"
            | "json"
            | "jsonb"
            | "text"
            | "varchar"
            | "bpchar"
            | "name"
            | "_text"
            | "_varchar"
            | "_uuid"
    )
}

/// Read of every row of `table`.
///
/// With the live column list, columns of types the reader cannot decode
/// (vector, numeric, bytea, enums, other arrays, ...) are read as text.
/// Without it, every column is selected as is.
pub fn select_rows(table: &TableConfig, columns: &[ColumnInfo]) -> String {
    let table_ident = quote_ident(table.name);
    if columns.is_empty() {
        return format!("SELECT * FROM {}", table_ident);
    }
    let list: Vec<String> = columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if reads_natively(&c.udt_name) {
                ident
            } else {
                format!("{}::text AS {}", ident, ident)
            }
        })
        .collect();
    format!("SELECT {} FROM {}", list.join(", "), table_ident)
}

/// Text form of a value for a text-cast parameter.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn canonical_timestamp(s: &str) -> String {
    parse_timestamp(s)
        .map(|dt| format_timestamp(&dt))
        .unwrap_or_else(|| s.to_string())
}

fn canonical_uuid(s: &str) -> String {
    Uuid::parse_str(s)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| s.to_string())
}

/// Parameter for a column whose live type is `udt`.
fn live_param(udt: &str, value: &Value) -> SqlParam {
    match (udt, value) {
        ("json" | "jsonb", v) => SqlParam::Json(v.clone()),
        (_, Value::Array(items)) if udt.starts_with('_') => SqlParam::TextArray(
            items
                .iter()
                .map(|item| match item {
                    Value::Null => None,
                    other if udt == "_uuid" => Some(canonical_uuid(&text_of(other))),
                    other => Some(text_of(other)),
                })
                .collect(),
        ),
        ("timestamp" | "timestamptz", Value::String(s)) => SqlParam::Text(canonical_timestamp(s)),
        ("uuid", Value::String(s)) => SqlParam::Text(canonical_uuid(s)),
        (_, v) => SqlParam::Text(text_of(v)),
    }
}

struct Binder<'a> {
    table: &'a TableConfig,
    types: &'a ColumnTypes,
    params: Vec<SqlParam>,
}

impl<'a> Binder<'a> {
    fn new(table: &'a TableConfig, types: &'a ColumnTypes) -> Self {
        Self {
            table,
            types,
            params: Vec::new(),
        }
    }

    /// Binds `value` for `column` and returns the SQL expression standing for it.
    fn bind(&mut self, column: &str, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        let (param, cast) = match self.types.get(column) {
            Some(udt) => (live_param(udt, value), format!("::{}", type_ident(udt))),
            None => self.declared_param(column, value),
        };
        self.params.push(param);
        format!("${}{}", self.params.len(), cast)
    }

    /// Parameter for a column the catalog did not report, typed from the
    /// registry declaration and the JSON kind of the value.
    fn declared_param(&self, column: &str, value: &Value) -> (SqlParam, String) {
        let (param, cast) = match value {
            Value::String(s) if self.table.is_timestamp(column) => {
                (SqlParam::Text(canonical_timestamp(s)), "::timestamptz")
            }
            Value::String(s) if self.table.is_uuid(column) => {
                (SqlParam::Text(canonical_uuid(s)), "::uuid")
            }
            Value::String(_) | Value::Array(_) if self.table.is_vector(column) => {
                (SqlParam::Text(text_of(value)), "::vector")
            }
            Value::String(s) => (SqlParam::Text(s.clone()), ""),
            Value::Bool(b) => (SqlParam::Bool(*b), ""),
            Value::Number(n) => match n.as_i64() {
                Some(i) => (SqlParam::Int(i), ""),
                None => (SqlParam::Float(n.as_f64().unwrap_or_default()), ""),
            },
            other => (SqlParam::Json(other.clone()), ""),
        };
        (param, cast.to_string())
    }

    /// `"a" = $1 AND "b" = $2` over the primary key of `key_row`.
    fn key_predicate(&mut self, key_row: &Row) -> String {
        let table = self.table;
        table
            .primary_key
            .iter()
            .map(|column| {
                let value = key_row.get(column).cloned().unwrap_or(Value::Null);
                let expr = self.bind(column, &value);
                format!("{} = {}", quote_ident(column), expr)
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Insert-or-update of one whole row keyed by the table's primary key.
///
/// Deferred columns are inserted as `NULL` and left out of the update clause,
/// so a value restored by an earlier second pass survives later first passes.
pub fn upsert(table: &TableConfig, row: &Row, types: &ColumnTypes) -> Statement {
    let mut binder = Binder::new(table, types);
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    let mut updates = Vec::new();

    for (column, value) in row.iter() {
        let ident = quote_ident(column);
        if table.is_deferred(column) {
            values.push("NULL".to_string());
        } else {
            values.push(binder.bind(column, value));
            if !table.is_primary_key(column) {
                updates.push(format!("{} = EXCLUDED.{}", ident, ident));
            }
        }
        columns.push(ident);
    }

    let conflict_target: Vec<String> =
        table.primary_key.iter().map(|c| quote_ident(c)).collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident(table.name),
        columns.join(", "),
        values.join(", "),
        conflict_target.join(", "),
        action
    );
    binder.finish(sql)
}

/// Targeted single-column update of the row addressed by `key_row`.
pub fn update_column(
    table: &TableConfig,
    key_row: &Row,
    column: &str,
    value: &Value,
    types: &ColumnTypes,
) -> Statement {
    let mut binder = Binder::new(table, types);
    let expr = binder.bind(column, value);
    let predicate = binder.key_predicate(key_row);
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {}",
        quote_ident(table.name),
        quote_ident(column),
        expr,
        predicate
    );
    binder.finish(sql)
}

/// Delete of the row addressed by `key_row`.
pub fn delete_row(table: &TableConfig, key_row: &Row, types: &ColumnTypes) -> Statement {
    let mut binder = Binder::new(table, types);
    let predicate = binder.key_predicate(key_row);
    let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table.name), predicate);
    binder.finish(sql)
}
