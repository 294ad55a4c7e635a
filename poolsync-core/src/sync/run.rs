//! One sync run: resolve, inventory, snapshot, transfer, prune

use super::executor::{Executor, OpStatus};
use super::inventory::{SnapshotInventory, SnapshotRecord, SnapshotTag};
use super::lifecycle::{DatasetOutcome, DatasetState, LifecycleEngine};
use super::resolver::resolve_datasets;
use super::retention::RetentionPruner;
use crate::config::{RunMode, SyncConfig};
use crate::storage::zfs::ZfsBackend;
use chrono::NaiveDateTime;
use poolsync_common::{format_snapshot_timestamp, PoolRole, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub destination: String,
    pub tag: String,
    pub run_timestamp: String,
    pub mode: RunMode,
    pub duration_ms: u64,
    pub datasets: Vec<DatasetOutcome>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.datasets.iter().any(|d| d.has_failures())
    }

    pub fn count_state(&self, state: DatasetState) -> usize {
        self.datasets.iter().filter(|d| d.state == state).count()
    }

    pub fn outcome(&self, dataset: &str) -> Option<&DatasetOutcome> {
        self.datasets.iter().find(|d| d.dataset == dataset)
    }
}

pub struct SyncRun<'a> {
    config: &'a SyncConfig,
    backend: &'a dyn ZfsBackend,
    started_at: NaiveDateTime,
    tag: SnapshotTag,
}

impl<'a> SyncRun<'a> {
    /// `started_at` becomes the snapshot suffix shared by every dataset
    pub fn new(config: &'a SyncConfig, backend: &'a dyn ZfsBackend, started_at: NaiveDateTime) -> Self {
        Self {
            config,
            backend,
            started_at,
            tag: SnapshotTag::for_pools(&config.source, &config.destination),
        }
    }

    pub fn tag(&self) -> &SnapshotTag {
        &self.tag
    }

    pub fn snapshot_name(&self) -> String {
        self.tag.snapshot_name(&self.started_at)
    }

    pub async fn execute(&self) -> Result<SyncReport> {
        let clock = Instant::now();
        let config = self.config;
        let snapshot_name = self.snapshot_name();

        info!(
            source = %config.source,
            destination = %config.destination,
            mode = %config.mode,
            keep = config.keep_snapshots,
            "Starting sync run {}",
            snapshot_name
        );

        let datasets =
            resolve_datasets(self.backend, &config.source, config.datasets.as_deref()).await?;
        if datasets.is_empty() {
            info!(pool = %config.source, "No datasets to process");
        }

        let source_before = SnapshotInventory::capture(self.backend, &config.source, &self.tag).await?;
        let destination_before =
            SnapshotInventory::capture(self.backend, &config.destination, &self.tag).await?;

        let executor = Executor::new(self.backend, config.mode);
        let engine = LifecycleEngine::new(
            &executor,
            &config.source,
            &config.destination,
            &snapshot_name,
            &config.exclusion,
        );

        let mut outcomes = engine.create_snapshots(&datasets, &destination_before).await;
        engine
            .transfer(&mut outcomes, &source_before, &destination_before)
            .await;

        let mut source_after =
            SnapshotInventory::capture(self.backend, &config.source, &self.tag).await?;
        let mut destination_after =
            SnapshotInventory::capture(self.backend, &config.destination, &self.tag).await?;

        if config.mode == RunMode::DryRun {
            self.add_planned(&outcomes, &mut source_after, &mut destination_after);
        }

        let pruner = RetentionPruner::new(&executor, config.keep_snapshots);
        for outcome in outcomes.iter_mut() {
            match outcome.state {
                DatasetState::Skipped => continue,
                DatasetState::FirstRun => {
                    debug!(dataset = %outcome.dataset, "First run, nothing to prune");
                    continue;
                }
                DatasetState::Incremental => {}
            }

            if !outcome.replicated() {
                warn!(
                    dataset = %outcome.dataset,
                    "Replication did not complete, skipping pruning"
                );
                continue;
            }

            outcome.source_prune = Some(
                pruner
                    .prune(&mut source_after, PoolRole::Source, &outcome.dataset)
                    .await,
            );
            outcome.destination_prune = Some(
                pruner
                    .prune(&mut destination_after, PoolRole::Destination, &outcome.dataset)
                    .await,
            );
        }

        let report = SyncReport {
            source: config.source.clone(),
            destination: config.destination.clone(),
            tag: self.tag.to_string(),
            run_timestamp: format_snapshot_timestamp(&self.started_at),
            mode: config.mode,
            duration_ms: clock.elapsed().as_millis() as u64,
            datasets: outcomes,
        };

        let summary = format!(
            "{} dataset(s): {} first-run, {} incremental, {} skipped",
            report.datasets.len(),
            report.count_state(DatasetState::FirstRun),
            report.count_state(DatasetState::Incremental),
            report.count_state(DatasetState::Skipped),
        );
        if report.has_failures() {
            warn!(duration_ms = report.duration_ms, "Sync run finished with failures: {}", summary);
        } else {
            info!(duration_ms = report.duration_ms, "Sync run finished: {}", summary);
        }

        Ok(report)
    }

    /// Dry-run listings lack the snapshots that were only echoed; add them
    /// so the prune preview counts this run's snapshot.
    fn add_planned(
        &self,
        outcomes: &[DatasetOutcome],
        source: &mut SnapshotInventory,
        destination: &mut SnapshotInventory,
    ) {
        let name = self.snapshot_name();

        for outcome in outcomes {
            if outcome.creation == OpStatus::Planned {
                source.insert(SnapshotRecord::new(
                    &self.config.source,
                    &outcome.dataset,
                    &name,
                    self.started_at,
                    u64::MAX,
                ));
            }
            if outcome.transfer == OpStatus::Planned {
                destination.insert(SnapshotRecord::new(
                    &self.config.destination,
                    &outcome.dataset,
                    &name,
                    self.started_at,
                    u64::MAX,
                ));
            }
        }
    }
}
