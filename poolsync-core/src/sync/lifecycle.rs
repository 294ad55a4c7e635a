//! Snapshot lifecycle engine
//!
//! Pass 1 creates one snapshot per dataset with the run's shared name.
//! Pass 2 sends each new snapshot to the destination, either as a full
//! stream (first run) or incrementally from the newest snapshot both pools
//! still share.

use super::executor::{Executor, OpStatus};
use super::inventory::{is_first_run, SnapshotInventory, SnapshotRecord};
use super::resolver::ExclusionPolicy;
use super::retention::PruneReport;
use crate::storage::zfs::ZfsCommand;
use serde::Serialize;
use tracing::{info, warn};

/// What happens to a dataset in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetState {
    /// Excluded by policy: no snapshot, transfer, or prune
    Skipped,
    /// Destination has no snapshot yet: full send
    FirstRun,
    /// Incremental send from the newest snapshot common to both pools
    Incremental,
}

impl std::fmt::Display for DatasetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetState::Skipped => write!(f, "skipped"),
            DatasetState::FirstRun => write!(f, "first-run"),
            DatasetState::Incremental => write!(f, "incremental"),
        }
    }
}

/// Everything done to one dataset during a run
#[derive(Debug, Clone, Serialize)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub state: DatasetState,
    /// Snapshot created on the source, `pool/dataset@name`
    pub snapshot: Option<String>,
    /// Lower bound of an incremental send
    pub base: Option<String>,
    pub creation: OpStatus,
    pub transfer: OpStatus,
    pub source_prune: Option<PruneReport>,
    pub destination_prune: Option<PruneReport>,
}

impl DatasetOutcome {
    fn new(dataset: &str, state: DatasetState) -> Self {
        Self {
            dataset: dataset.to_string(),
            state,
            snapshot: None,
            base: None,
            creation: OpStatus::NotAttempted,
            transfer: OpStatus::NotAttempted,
            source_prune: None,
            destination_prune: None,
        }
    }

    /// Both the snapshot and its transfer went ahead
    pub fn replicated(&self) -> bool {
        self.creation.went_ahead() && self.transfer.went_ahead()
    }

    pub fn has_failures(&self) -> bool {
        self.creation.is_failure()
            || self.transfer.is_failure()
            || self.source_prune.as_ref().is_some_and(|r| r.has_failures())
            || self.destination_prune.as_ref().is_some_and(|r| r.has_failures())
    }
}

pub struct LifecycleEngine<'a> {
    executor: &'a Executor<'a>,
    source: &'a str,
    destination: &'a str,
    snapshot_name: &'a str,
    exclusion: &'a ExclusionPolicy,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(
        executor: &'a Executor<'a>,
        source: &'a str,
        destination: &'a str,
        snapshot_name: &'a str,
        exclusion: &'a ExclusionPolicy,
    ) -> Self {
        Self {
            executor,
            source,
            destination,
            snapshot_name,
            exclusion,
        }
    }

    pub fn classify(&self, dataset: &str, destination: &SnapshotInventory) -> DatasetState {
        if self.exclusion.is_excluded(dataset) {
            DatasetState::Skipped
        } else if is_first_run(destination, dataset) {
            DatasetState::FirstRun
        } else {
            DatasetState::Incremental
        }
    }

    /// Pass 1: classify every dataset and snapshot the ones not skipped
    pub async fn create_snapshots(
        &self,
        datasets: &[String],
        destination: &SnapshotInventory,
    ) -> Vec<DatasetOutcome> {
        let mut outcomes = Vec::with_capacity(datasets.len());

        for dataset in datasets {
            let state = self.classify(dataset, destination);
            let mut outcome = DatasetOutcome::new(dataset, state);

            if state == DatasetState::Skipped {
                info!(dataset = %dataset, "Skipping excluded dataset");
                outcomes.push(outcome);
                continue;
            }

            let snapshot = format!("{}/{}@{}", self.source, dataset, self.snapshot_name);
            outcome.creation = self
                .executor
                .run(&ZfsCommand::Snapshot {
                    snapshot: snapshot.clone(),
                })
                .await;
            outcome.snapshot = Some(snapshot);
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Pass 2: send each new snapshot. Both inventories are the ones captured
    /// before pass 1.
    pub async fn transfer(
        &self,
        outcomes: &mut [DatasetOutcome],
        source: &SnapshotInventory,
        destination: &SnapshotInventory,
    ) {
        for outcome in outcomes.iter_mut() {
            let snapshot = match (&outcome.state, &outcome.snapshot) {
                (DatasetState::Skipped, _) | (_, None) => continue,
                (_, Some(snapshot)) => snapshot.clone(),
            };

            if !outcome.creation.went_ahead() {
                warn!(dataset = %outcome.dataset, "Snapshot was not created, skipping transfer");
                continue;
            }

            let target = format!("{}/{}", self.destination, outcome.dataset);

            let base = match outcome.state {
                DatasetState::FirstRun => {
                    info!(dataset = %outcome.dataset, "First run, sending full stream");
                    None
                }
                _ => match common_base(source, destination, &outcome.dataset) {
                    Some(prior) => {
                        if source.latest(&outcome.dataset).map(|l| &l.name) != Some(&prior.name) {
                            warn!(
                                dataset = %outcome.dataset,
                                base = %prior.full_name,
                                "Destination is behind the source, sending from the newest common snapshot"
                            );
                        }
                        info!(
                            dataset = %outcome.dataset,
                            base = %prior.full_name,
                            "Sending incremental stream"
                        );
                        Some(prior.full_name.clone())
                    }
                    None => {
                        let reason = "no snapshot in common with destination; full resend required";
                        warn!(dataset = %outcome.dataset, "{}", reason);
                        outcome.transfer = OpStatus::Failed(reason.to_string());
                        continue;
                    }
                },
            };

            outcome.base = base.clone();
            outcome.transfer = self
                .executor
                .run(&ZfsCommand::Send {
                    snapshot,
                    base,
                    target,
                })
                .await;
        }
    }
}

/// Newest source snapshot of `dataset` whose short name is also on the destination
pub fn common_base<'i>(
    source: &'i SnapshotInventory,
    destination: &SnapshotInventory,
    dataset: &str,
) -> Option<&'i SnapshotRecord> {
    let received = destination.snapshots(dataset);
    source
        .snapshots(dataset)
        .iter()
        .rev()
        .find(|record| received.iter().any(|r| r.name == record.name))
}
