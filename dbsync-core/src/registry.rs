//! Table sync registry.
//!
//! The registry is the ordered list of tables the engine synchronizes, with
//! the per-table configuration the merge loop needs. Order is a topological
//! order of foreign-key dependencies: a referenced table always comes before
//! the tables referencing it, except through deferred columns, which break
//! cycles (including self-references) and are restored in a second pass.
//!
//! Per-table special cases are declared as [`Capability`] values on the table
//! entry rather than being keyed off table names in the engine.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// A foreign-key column and the table it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
    /// Written as null in pass 1 and restored in pass 2.
    pub deferred: bool,
}

/// Declarative per-table special cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Capability {
    /// Column holding a vector embedding; read cast to text and written cast to vector.
    VectorColumn(&'static str),
    /// Rows whose key appears in the named tombstone table are hard-deleted and never resurrected.
    TombstonedBy(&'static str),
    /// Boolean column that may be true on at most one row.
    SingletonFlag(&'static str),
}

/// Per-table sync configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TableConfig {
    pub name: &'static str,
    pub primary_key: Vec<&'static str>,
    pub uuid_columns: Vec<&'static str>,
    pub timestamp_columns: Vec<&'static str>,
    pub foreign_keys: Vec<ForeignKey>,
    pub capabilities: Vec<Capability>,
}

impl TableConfig {
    /// A table keyed by a single `id` column.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            primary_key: vec!["id"],
            uuid_columns: Vec::new(),
            timestamp_columns: Vec::new(),
            foreign_keys: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: &[&'static str]) -> Self {
        self.primary_key = columns.to_vec();
        self
    }

    pub fn with_uuids(mut self, columns: &[&'static str]) -> Self {
        self.uuid_columns = columns.to_vec();
        self
    }

    pub fn with_timestamps(mut self, columns: &[&'static str]) -> Self {
        self.timestamp_columns = columns.to_vec();
        self
    }

    pub fn with_fk(mut self, column: &'static str, references: &'static str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column,
            references,
            deferred: false,
        });
        self
    }

    pub fn with_deferred_fk(mut self, column: &'static str, references: &'static str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column,
            references,
            deferred: true,
        });
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// The field used to decide which side of a conflict is newer:
    /// `updated_at` when declared, otherwise `created_at`.
    pub fn recency_field(&self) -> Option<&'static str> {
        ["updated_at", "created_at"]
            .into_iter()
            .find(|f| self.timestamp_columns.contains(f))
    }

    pub fn deferred_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.deferred)
            .map(|fk| fk.column)
    }

    pub fn is_deferred(&self, column: &str) -> bool {
        self.deferred_columns().any(|c| c == column)
    }

    pub fn has_deferred_columns(&self) -> bool {
        self.foreign_keys.iter().any(|fk| fk.deferred)
    }

    pub fn is_uuid(&self, column: &str) -> bool {
        self.uuid_columns.iter().any(|c| *c == column)
    }

    pub fn is_timestamp(&self, column: &str) -> bool {
        self.timestamp_columns.iter().any(|c| *c == column)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| *c == column)
    }

    pub fn vector_column(&self) -> Option<&'static str> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::VectorColumn(column) => Some(*column),
            _ => None,
        })
    }

    pub fn is_vector(&self, column: &str) -> bool {
        self.vector_column() == Some(column)
    }

    pub fn tombstone_table(&self) -> Option<&'static str> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::TombstonedBy(table) => Some(*table),
            _ => None,
        })
    }

    pub fn singleton_flags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.capabilities.iter().filter_map(|c| match c {
            Capability::SingletonFlag(column) => Some(*column),
            _ => None,
        })
    }
}

/// Structural errors in a registry definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry has no tables")]
    Empty,
    #[error("table '{0}' is registered more than once")]
    DuplicateTable(String),
    #[error("table '{0}' has no primary key")]
    MissingPrimaryKey(String),
    #[error("table '{0}' declares neither updated_at nor created_at as a timestamp column")]
    MissingRecencyField(String),
    #[error("{table}.{column} references unregistered table '{references}'")]
    UnknownReference {
        table: String,
        column: String,
        references: String,
    },
    #[error("{table}.{column} references '{references}', which is not synced earlier; declare the column deferred")]
    OutOfOrder {
        table: String,
        column: String,
        references: String,
    },
    #[error("{table}.{column} is deferred but is part of the primary key")]
    DeferredPrimaryKey { table: String, column: String },
    #[error("table '{table}' is tombstoned by '{tombstones}', which must be registered before it")]
    TombstoneOrder { table: String, tombstones: String },
}

/// Validated, immutable table list in sync order.
#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    tables: Vec<TableConfig>,
}

impl Registry {
    /// Validates the table list and freezes it.
    pub fn new(tables: Vec<TableConfig>) -> Result<Self, RegistryError> {
        if tables.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut position = HashMap::new();
        for (i, table) in tables.iter().enumerate() {
            if position.insert(table.name, i).is_some() {
                return Err(RegistryError::DuplicateTable(table.name.to_string()));
            }
        }

        for (i, table) in tables.iter().enumerate() {
            if table.primary_key.is_empty() {
                return Err(RegistryError::MissingPrimaryKey(table.name.to_string()));
            }
            if table.recency_field().is_none() {
                return Err(RegistryError::MissingRecencyField(table.name.to_string()));
            }
            for fk in &table.foreign_keys {
                let Some(&target) = position.get(fk.references) else {
                    return Err(RegistryError::UnknownReference {
                        table: table.name.to_string(),
                        column: fk.column.to_string(),
                        references: fk.references.to_string(),
                    });
                };
                if fk.deferred {
                    if table.is_primary_key(fk.column) {
                        return Err(RegistryError::DeferredPrimaryKey {
                            table: table.name.to_string(),
                            column: fk.column.to_string(),
                        });
                    }
                } else if target >= i {
                    return Err(RegistryError::OutOfOrder {
                        table: table.name.to_string(),
                        column: fk.column.to_string(),
                        references: fk.references.to_string(),
                    });
                }
            }
            if let Some(tombstones) = table.tombstone_table() {
                if !matches!(position.get(tombstones), Some(&t) if t < i) {
                    return Err(RegistryError::TombstoneOrder {
                        table: table.name.to_string(),
                        tombstones: tombstones.to_string(),
                    });
                }
            }
        }

        Ok(Self { tables })
    }

    /// The tables of the companion-bot schema, in dependency order.
    pub fn standard() -> Result<Self, RegistryError> {
        const TS: &[&str] = &["created_at", "updated_at"];

        Self::new(vec![
            TableConfig::new("users")
                .with_uuids(&["id", "default_persona_id", "default_llm_config_id"])
                .with_timestamps(TS)
                .with_deferred_fk("default_persona_id", "personas")
                .with_deferred_fk("default_llm_config_id", "llm_configs"),
            TableConfig::new("personas")
                .with_uuids(&["id", "owner_id"])
                .with_timestamps(TS)
                .with_fk("owner_id", "users"),
            TableConfig::new("system_prompts")
                .with_uuids(&["id", "owner_id"])
                .with_timestamps(TS)
                .with_fk("owner_id", "users"),
            TableConfig::new("llm_configs")
                .with_uuids(&["id", "owner_id"])
                .with_timestamps(TS)
                .with_fk("owner_id", "users")
                .with_capability(Capability::SingletonFlag("is_default"))
                .with_capability(Capability::SingletonFlag("is_free_default")),
            TableConfig::new("personalities")
                .with_uuids(&["id", "owner_id", "system_prompt_id", "forked_from_id"])
                .with_timestamps(TS)
                .with_fk("owner_id", "users")
                .with_fk("system_prompt_id", "system_prompts")
                .with_deferred_fk("forked_from_id", "personalities"),
            TableConfig::new("personality_default_configs")
                .with_primary_key(&["personality_id"])
                .with_uuids(&["personality_id", "llm_config_id"])
                .with_timestamps(TS)
                .with_fk("personality_id", "personalities")
                .with_fk("llm_config_id", "llm_configs"),
            TableConfig::new("personality_owners")
                .with_primary_key(&["personality_id", "user_id"])
                .with_uuids(&["personality_id", "user_id"])
                .with_timestamps(TS)
                .with_fk("personality_id", "personalities")
                .with_fk("user_id", "users"),
            TableConfig::new("user_personality_configs")
                .with_uuids(&["id", "user_id", "personality_id", "persona_id", "llm_config_id"])
                .with_timestamps(TS)
                .with_fk("user_id", "users")
                .with_fk("personality_id", "personalities")
                .with_fk("persona_id", "personas")
                .with_fk("llm_config_id", "llm_configs"),
            TableConfig::new("activated_channels")
                .with_uuids(&["id", "personality_id", "created_by"])
                .with_timestamps(TS)
                .with_fk("personality_id", "personalities")
                .with_fk("created_by", "users"),
            TableConfig::new("conversation_history_tombstones")
                .with_uuids(&["id", "personality_id", "persona_id"])
                .with_timestamps(&["created_at", "deleted_at"]),
            TableConfig::new("conversation_history")
                .with_uuids(&["id", "personality_id", "persona_id"])
                .with_timestamps(TS)
                .with_fk("personality_id", "personalities")
                .with_fk("persona_id", "personas")
                .with_capability(Capability::TombstonedBy("conversation_history_tombstones")),
            TableConfig::new("memories")
                .with_uuids(&["id", "persona_id", "personality_id"])
                .with_timestamps(TS)
                .with_fk("persona_id", "personas")
                .with_fk("personality_id", "personalities")
                .with_capability(Capability::VectorColumn("embedding")),
        ])
    }

    pub fn tables(&self) -> &[TableConfig] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables with at least one deferred column, in sync order.
    pub fn deferred_tables(&self) -> impl Iterator<Item = &TableConfig> {
        self.tables.iter().filter(|t| t.has_deferred_columns())
    }

    /// Every `(table, flag)` pair that must hold at most one `true`.
    pub fn singleton_flags(&self) -> Vec<(&TableConfig, &'static str)> {
        self.tables
            .iter()
            .flat_map(|t| t.singleton_flags().map(move |f| (t, f)))
            .collect()
    }
}
