//! Cross-store resolution of "at most one row may hold this flag" columns.
//!
//! Each store enforces the invariant on its own, but two stores merged row by
//! row can end up with different rows holding the flag. The newest holder
//! keeps it; every other holder in either store has it cleared with a
//! targeted single-column update.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::registry::TableConfig;
use crate::row::Row;
use crate::side::Side;

/// A row in one store whose flag is set.
#[derive(Debug, Clone)]
pub struct FlagHolder {
    pub side: Side,
    pub key: String,
    pub key_row: Row,
    pub recency: Option<DateTime<Utc>>,
}

/// A holder that loses the flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagClear {
    pub side: Side,
    pub key: String,
    pub key_row: Row,
}

#[derive(Debug, Clone, Default)]
pub struct FlagResolution {
    pub winner: Option<String>,
    pub clears: Vec<FlagClear>,
}

/// Collects the rows of one store holding `flag`.
pub fn collect_holders(
    table: &TableConfig,
    flag: &str,
    side: Side,
    rows: &[Row],
) -> Vec<FlagHolder> {
    let field = table.recency_field().unwrap_or("updated_at");
    rows.iter()
        .filter(|r| r.flag(flag))
        .filter_map(|r| {
            let key = r.key(&table.primary_key)?;
            Some(FlagHolder {
                side,
                key,
                key_row: r.project(&table.primary_key),
                recency: r.timestamp(field),
            })
        })
        .collect()
}

/// Picks the surviving holder across both stores.
///
/// When only one key holds the flag (in one store or both) nothing changes.
/// Otherwise the key with the newest recency wins; ties, including missing
/// timestamps, go to the smallest key so that reruns are deterministic.
pub fn resolve(holders: &[FlagHolder]) -> FlagResolution {
    let mut newest: BTreeMap<&str, Option<DateTime<Utc>>> = BTreeMap::new();
    for holder in holders {
        let entry = newest.entry(holder.key.as_str()).or_insert(holder.recency);
        if holder.recency > *entry {
            *entry = holder.recency;
        }
    }

    if newest.len() <= 1 {
        return FlagResolution {
            winner: newest.keys().next().map(|k| k.to_string()),
            clears: Vec::new(),
        };
    }

    // BTreeMap iterates keys ascending, so the first maximum found is the smallest key.
    let mut winner: Option<(&str, Option<DateTime<Utc>>)> = None;
    for (key, recency) in &newest {
        match winner {
            Some((_, best)) if *recency <= best => {}
            _ => winner = Some((*key, *recency)),
        }
    }
    let winner = winner.map(|(k, _)| k.to_string());

    let clears = holders
        .iter()
        .filter(|h| Some(&h.key) != winner.as_ref())
        .map(|h| FlagClear {
            side: h.side,
            key: h.key.clone(),
            key_row: h.key_row.clone(),
        })
        .collect();

    FlagResolution { winner, clears }
}
