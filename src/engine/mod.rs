//! Sync orchestrator.
//!
//! [`DbSync`] owns the two stores and the table registry and runs one batch
//! merge per call: schema version check, registry drift check, tombstone load,
//! the per-table last-write-wins pass in dependency order, and then, unless
//! previewing, singleton flag reconciliation and the deferred foreign-key pass.
//! Both stores are connected at the start of a call and disconnected on every
//! exit path.

mod deferred;
mod schema;
mod singleton;
mod tombstones;

use dbsync_core::{
    plan_table, Direction, PassOneSources, Registry, RowMap, Side, SyncReport, TableConfig,
    TablePlan, TombstoneSet,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::SyncError;
use crate::store::SyncStore;

/// Options for a single [`DbSync::sync`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Read and diff everything but write nothing.
    pub dry_run: bool,
}

/// Result of [`DbSync::check`].
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub schema_version: String,
    pub warnings: Vec<String>,
}

pub struct DbSync<S: SyncStore> {
    dev: S,
    prod: S,
    registry: Registry,
}

impl<S: SyncStore> DbSync<S> {
    pub fn new(dev: S, prod: S, registry: Registry) -> Self {
        Self { dev, prod, registry }
    }

    /// Uses the standard companion-bot table registry.
    pub fn standard(dev: S, prod: S) -> Result<Self, SyncError> {
        Ok(Self::new(dev, prod, Registry::standard()?))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self, side: Side) -> &S {
        match side {
            Side::Dev => &self.dev,
            Side::Prod => &self.prod,
        }
    }

    pub fn into_stores(self) -> (S, S) {
        (self.dev, self.prod)
    }

    /// Merges the two stores.
    ///
    /// Fails before any write when the schema versions differ. Any store
    /// error aborts the remaining work and is returned after both
    /// connections have been released; a rerun picks up where it stopped.
    pub async fn sync(&mut self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        self.connect().await?;
        let result = self.run(options).await;
        self.disconnect().await;

        let report = result?;
        let total = report.stats.total();
        tracing::info!(
            "sync{} complete: {} dev -> prod, {} prod -> dev, {} conflict(s), {} warning(s)",
            if report.dry_run { " (dry run)" } else { "" },
            total.dev_to_prod,
            total.prod_to_dev,
            total.conflicts,
            report.warnings.len()
        );
        Ok(report)
    }

    /// Validates schema versions and registry drift without touching any row.
    pub async fn check(&mut self) -> Result<CheckReport, SyncError> {
        self.connect().await?;
        let result = self.run_check().await;
        self.disconnect().await;
        result
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        self.dev.connect().await?;
        if let Err(e) = self.prod.connect().await {
            self.dev.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.dev.disconnect().await;
        self.prod.disconnect().await;
    }

    async fn run_check(&self) -> Result<CheckReport, SyncError> {
        let schema_version = schema::validate_versions(&self.dev, &self.prod).await?;
        let warnings = schema::validate_registry(&self.registry, &self.dev, &self.prod).await?;
        Ok(CheckReport {
            schema_version,
            warnings,
        })
    }

    async fn run(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        report.schema_version = schema::validate_versions(&self.dev, &self.prod).await?;
        report.warnings.extend(
            schema::validate_registry(&self.registry, &self.dev, &self.prod).await?,
        );

        let tombstones = tombstones::load(&self.registry, &self.dev, &self.prod).await?;
        let mut sources: HashMap<&'static str, PassOneSources> = HashMap::new();

        for table in self.registry.tables() {
            let plan = self.sync_table(table, &tombstones, options).await?;
            if table.has_deferred_columns() {
                let written = plan
                    .writes
                    .iter()
                    .map(|w| (w.key.clone(), w.direction.source()))
                    .collect();
                sources.insert(table.name, written);
            }
            report.stats.record(table.name, plan.stats);
            report.warnings.extend(plan.warnings);
        }

        if options.dry_run {
            tracing::info!("dry run: skipping singleton reconciliation and deferred foreign keys");
        } else {
            report.singleton_clears =
                singleton::reconcile(&self.registry, &self.dev, &self.prod).await?;

            let (updates, warnings) =
                deferred::restore(&self.registry, &self.dev, &self.prod, &sources).await?;
            report.deferred_updates = updates;
            report.warnings.extend(warnings);
        }

        Ok(report)
    }

    /// Pass 1 for one table. Warnings of the plan are logged before any of
    /// its writes run.
    async fn sync_table(
        &self,
        table: &TableConfig,
        tombstones: &TombstoneSet,
        options: SyncOptions,
    ) -> Result<TablePlan, SyncError> {
        let dev = RowMap::build(self.dev.fetch_rows(table).await?, &table.primary_key);
        let prod = RowMap::build(self.prod.fetch_rows(table).await?, &table.primary_key);

        if table.tombstone_table().is_some() && !options.dry_run {
            tombstones::purge(table, tombstones, &self.dev, &dev).await?;
            tombstones::purge(table, tombstones, &self.prod, &prod).await?;
        }

        let plan = plan_table(table, &dev, &prod, tombstones);
        log_warnings(&plan.warnings);
        tracing::info!(
            "{}: dev {} row(s), prod {} row(s), {} dev -> prod, {} prod -> dev, {} conflict(s)",
            table.name,
            dev.len(),
            prod.len(),
            plan.stats.dev_to_prod,
            plan.stats.prod_to_dev,
            plan.stats.conflicts
        );
        if plan.tombstoned > 0 {
            tracing::debug!("{}: {} tombstoned key(s) skipped", table.name, plan.tombstoned);
        }

        if !options.dry_run {
            for write in &plan.writes {
                tracing::debug!(
                    "{}[{}]: {:?} {}",
                    table.name,
                    write.key,
                    write.kind,
                    write.direction
                );
                self.target(write.direction)
                    .upsert_row(table, &write.row)
                    .await?;
            }
        }

        Ok(plan)
    }

    fn target(&self, direction: Direction) -> &S {
        self.store(direction.target())
    }
}

/// Emits warnings as soon as the step producing them finishes.
fn log_warnings(warnings: &[String]) {
    for warning in warnings {
        tracing::warn!("{}", warning);
    }
}
