//! Generic row model.
//!
//! A [`Row`] is an opaque column-name to JSON-value mapping fetched from one
//! store. Rows are indexed into a [`RowMap`] by their primary-key string so
//! that two stores' snapshots of the same table can be diffed key by key.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Separator used when joining the values of a composite primary key.
/// Separators and backslashes inside a value are backslash-escaped.
pub const KEY_SEPARATOR: char = '|';

/// One row of one table, as read from a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(column.into(), value)
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when the column holds boolean `true`.
    pub fn flag(&self, column: &str) -> bool {
        matches!(self.0.get(column), Some(Value::Bool(true)))
    }

    /// Parses the given column as an instant. Missing, null or unparseable
    /// values yield `None`.
    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        match self.0.get(column) {
            Some(Value::String(s)) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Builds the primary-key string of this row.
    ///
    /// A single-column key is the value itself. Composite keys are joined
    /// with [`KEY_SEPARATOR`] in declaration order, each value escaped, so two
    /// different key tuples never produce the same string.
    /// Returns `None` if any key column is missing or null.
    pub fn key(&self, primary_key: &[&str]) -> Option<String> {
        let mut parts = Vec::with_capacity(primary_key.len());
        for column in primary_key {
            match self.0.get(*column) {
                None | Some(Value::Null) => return None,
                Some(value) => parts.push(key_part(value)),
            }
        }
        if parts.len() == 1 {
            return parts.pop();
        }
        let escaped: Vec<String> = parts.iter().map(|p| escape_key_part(p)).collect();
        Some(escaped.join(&KEY_SEPARATOR.to_string()))
    }

    /// Returns a row holding only the given columns (used to address a row by key).
    pub fn project(&self, columns: &[&str]) -> Row {
        let mut out = Row::new();
        for column in columns {
            if let Some(value) = self.0.get(*column) {
                out.insert(*column, value.clone());
            }
        }
        out
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_key_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c == KEY_SEPARATOR || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parses a timestamp as rendered by the stores.
///
/// Accepts RFC 3339 (with offset) and naive ISO 8601 timestamps, which are
/// taken to be UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres text output: "2024-05-01 10:00:00.123+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Canonical text form of an instant, used whenever a timestamp is written.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Primary-key indexed snapshot of one table in one store.
#[derive(Debug, Clone, Default)]
pub struct RowMap {
    rows: BTreeMap<String, Row>,
    /// Rows skipped because their key could not be built.
    pub keyless: usize,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes rows by primary key. Rows with a missing key column are counted
    /// in [`RowMap::keyless`] and left out.
    pub fn build(rows: Vec<Row>, primary_key: &[&str]) -> Self {
        let mut map = Self::new();
        for row in rows {
            match row.key(primary_key) {
                Some(key) => {
                    map.rows.insert(key, row);
                }
                None => map.keyless += 1,
            }
        }
        map
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&String, &Row)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
