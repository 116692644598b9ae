//! Registry-versus-live-schema drift checks.
//!
//! Drift never blocks a sync. Each finding is returned as a warning string and
//! the engine carries on with the declared configuration.

use serde::{Deserialize, Serialize};

use crate::registry::TableConfig;
use crate::side::Side;

/// One column as reported by a store's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Underlying type name (`uuid`, `timestamptz`, `vector`, `bool`, ...).
    pub udt_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, udt_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            udt_name: udt_name.into(),
        }
    }
}

fn is_timestamp_type(udt: &str) -> bool {
    matches!(udt, "timestamp" | "timestamptz")
}

/// Cross-checks one table's declaration against the live columns of one store.
pub fn check_table(table: &TableConfig, side: Side, columns: &[ColumnInfo]) -> Vec<String> {
    let mut warnings = Vec::new();

    if columns.is_empty() {
        warnings.push(format!("{}: table not found in {} schema", table.name, side));
        return warnings;
    }

    let find = |name: &str| columns.iter().find(|c| c.name == name);

    for column in &table.primary_key {
        if find(column).is_none() {
            warnings.push(format!(
                "{}: primary key column '{}' missing in {} schema",
                table.name, column, side
            ));
        }
    }

    for column in &table.uuid_columns {
        match find(column) {
            None => warnings.push(format!(
                "{}: declared uuid column '{}' missing in {} schema",
                table.name, column, side
            )),
            Some(c) if c.udt_name != "uuid" => warnings.push(format!(
                "{}: declared uuid column '{}' has type '{}' in {} schema",
                table.name, column, c.udt_name, side
            )),
            Some(_) => {}
        }
    }

    for c in columns.iter().filter(|c| c.udt_name == "uuid") {
        if !table.is_uuid(&c.name) {
            warnings.push(format!(
                "{}: uuid column '{}' in {} schema is not declared in the registry",
                table.name, c.name, side
            ));
        }
    }

    for column in &table.timestamp_columns {
        match find(column) {
            None => warnings.push(format!(
                "{}: declared timestamp column '{}' missing in {} schema",
                table.name, column, side
            )),
            Some(c) if !is_timestamp_type(&c.udt_name) => warnings.push(format!(
                "{}: declared timestamp column '{}' has type '{}' in {} schema",
                table.name, column, c.udt_name, side
            )),
            Some(_) => {}
        }
    }

    for column in table.deferred_columns() {
        if find(column).is_none() {
            warnings.push(format!(
                "{}: deferred column '{}' missing in {} schema",
                table.name, column, side
            ));
        }
    }

    if let Some(column) = table.vector_column() {
        match find(column) {
            Some(c) if c.udt_name == "vector" => {}
            Some(c) => warnings.push(format!(
                "{}: vector column '{}' has type '{}' in {} schema",
                table.name, column, c.udt_name, side
            )),
            None => warnings.push(format!(
                "{}: vector column '{}' missing in {} schema",
                table.name, column, side
            )),
        }
    }

    for flag in table.singleton_flags() {
        match find(flag) {
            Some(c) if c.udt_name == "bool" => {}
            _ => warnings.push(format!(
                "{}: singleton flag '{}' is not a boolean column in {} schema",
                table.name, flag, side
            )),
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Capability;

    fn table() -> TableConfig {
        TableConfig::new("llm_configs")
            .with_uuids(&["id", "owner_id"])
            .with_timestamps(&["created_at", "updated_at"])
            .with_capability(Capability::SingletonFlag("is_default"))
    }

    fn live() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "uuid"),
            ColumnInfo::new("owner_id", "uuid"),
            ColumnInfo::new("name", "text"),
            ColumnInfo::new("is_default", "bool"),
            ColumnInfo::new("created_at", "timestamptz"),
            ColumnInfo::new("updated_at", "timestamp"),
        ]
    }

    #[test]
    fn test_matching_schema_has_no_warnings() {
        assert!(check_table(&table(), Side::Dev, &live()).is_empty());
    }

    #[test]
    fn test_missing_table() {
        let warnings = check_table(&table(), Side::Prod, &[]);
        assert_eq!(warnings, vec!["llm_configs: table not found in prod schema"]);
    }

    #[test]
    fn test_undeclared_uuid_column() {
        let mut columns = live();
        columns.push(ColumnInfo::new("persona_id", "uuid"));
        let warnings = check_table(&table(), Side::Dev, &columns);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0],
            "llm_configs: uuid column 'persona_id' in dev schema is not declared in the registry"
        );
    }

    #[test]
    fn test_declared_uuid_with_wrong_type() {
        let mut columns = live();
        columns[1] = ColumnInfo::new("owner_id", "text");
        let warnings = check_table(&table(), Side::Dev, &columns);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("has type 'text'"));
    }

    #[test]
    fn test_missing_flag_and_timestamp() {
        let columns: Vec<_> = live()
            .into_iter()
            .filter(|c| c.name != "is_default" && c.name != "updated_at")
            .collect();
        let warnings = check_table(&table(), Side::Prod, &columns);
        assert_eq!(warnings.len(), 2);
    }
}
