//! Retention pruning: keep the newest N tool-created snapshots per dataset

use super::executor::{Executor, OpStatus};
use super::inventory::{SnapshotInventory, SnapshotRecord};
use crate::storage::zfs::ZfsCommand;
use poolsync_common::PoolRole;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What one prune pass did on one pool for one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub pool: String,
    pub role: PoolRole,
    pub destroyed: Vec<String>,
    /// Would be destroyed (dry-run)
    pub planned: Vec<String>,
    /// Entries that did not look like snapshot identifiers
    pub unsafe_skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl PruneReport {
    fn new(pool: &str, role: PoolRole) -> Self {
        Self {
            pool: pool.to_string(),
            role,
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn removed(&self) -> usize {
        self.destroyed.len() + self.planned.len()
    }
}

/// The oldest records beyond the newest `keep`, given oldest-first input
pub fn select_excess(records: &[SnapshotRecord], keep: u32) -> &[SnapshotRecord] {
    let excess = records.len().saturating_sub(keep as usize);
    &records[..excess]
}

pub struct RetentionPruner<'a> {
    executor: &'a Executor<'a>,
    keep: u32,
}

impl<'a> RetentionPruner<'a> {
    pub fn new(executor: &'a Executor<'a>, keep: u32) -> Self {
        Self { executor, keep }
    }

    /// Destroy the oldest snapshots of `dataset` beyond the retention window,
    /// one at a time. Destroyed (or planned) records leave `inventory`.
    pub async fn prune(
        &self,
        inventory: &mut SnapshotInventory,
        role: PoolRole,
        dataset: &str,
    ) -> PruneReport {
        let mut report = PruneReport::new(inventory.pool(), role);
        let count = inventory.count(dataset);

        if count <= self.keep as usize {
            debug!(
                pool = inventory.pool(),
                dataset,
                count,
                keep = self.keep,
                "Within retention window"
            );
            return report;
        }

        let candidates = select_excess(inventory.snapshots(dataset), self.keep).to_vec();
        info!(
            pool = inventory.pool(),
            %role,
            dataset,
            count,
            keep = self.keep,
            "Pruning {} snapshot(s)",
            candidates.len()
        );

        for candidate in candidates {
            if !candidate.is_snapshot_identifier() {
                warn!(
                    pool = inventory.pool(),
                    dataset,
                    "Refusing to destroy '{}': not a snapshot identifier",
                    candidate.full_name
                );
                report.unsafe_skipped.push(candidate.full_name);
                continue;
            }

            let status = self
                .executor
                .run(&ZfsCommand::Destroy {
                    snapshot: candidate.full_name.clone(),
                })
                .await;

            match status {
                OpStatus::Succeeded => {
                    inventory.remove(&candidate.full_name);
                    report.destroyed.push(candidate.full_name);
                }
                OpStatus::Planned => {
                    inventory.remove(&candidate.full_name);
                    report.planned.push(candidate.full_name);
                }
                OpStatus::Failed(_) | OpStatus::NotAttempted => {
                    report.failed.push(candidate.full_name);
                }
            }
        }

        report
    }
}
