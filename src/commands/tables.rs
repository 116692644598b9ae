use clap::Args;
use dbsync_core::{Capability, Registry, TableConfig};

use super::OutputFormat;

/// List the synced tables in dependency order
#[derive(Debug, Args)]
pub struct TablesCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl TablesCommand {
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let registry = Registry::standard()?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&registry)?),
            OutputFormat::Text => {
                for (i, table) in registry.tables().iter().enumerate() {
                    println!("{:>2}. {}", i + 1, describe(table));
                }
            }
        }
        Ok(())
    }
}

fn describe(table: &TableConfig) -> String {
    let mut parts = vec![format!("key ({})", table.primary_key.join(", "))];
    if let Some(field) = table.recency_field() {
        parts.push(format!("recency {}", field));
    }
    let deferred: Vec<_> = table.deferred_columns().collect();
    if !deferred.is_empty() {
        parts.push(format!("deferred {}", deferred.join(", ")));
    }
    for capability in &table.capabilities {
        parts.push(match capability {
            Capability::VectorColumn(column) => format!("vector {}", column),
            Capability::TombstonedBy(tombstones) => format!("tombstoned by {}", tombstones),
            Capability::SingletonFlag(flag) => format!("singleton {}", flag),
        });
    }
    format!("{}: {}", table.name, parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_capabilities() {
        let registry = Registry::standard().unwrap();
        let users = describe(registry.get("users").unwrap());
        assert!(users.starts_with("users: key (id)"));
        assert!(users.contains("deferred default_persona_id, default_llm_config_id"));

        let memories = describe(registry.get("memories").unwrap());
        assert!(memories.contains("vector embedding"));

        let owners = describe(registry.get("personality_owners").unwrap());
        assert!(owners.contains("key (personality_id, user_id)"));
    }
}
