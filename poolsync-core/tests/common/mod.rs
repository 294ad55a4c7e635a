//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use poolsync_common::{Error, Result};
use poolsync_core::config::{FileConfig, RunMode, SyncConfig, SyncOptions};
use poolsync_core::storage::{CommandOutput, RawSnapshot, ZfsBackend, ZfsCommand};
use poolsync_core::sync::SnapshotTag;
use std::collections::HashSet;
use std::sync::Mutex;

/// In-memory pools that apply snapshot, send/receive and destroy
#[derive(Default)]
pub struct FakeZfs {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    datasets: Vec<String>,
    snapshots: Vec<RawSnapshot>,
    next_txg: u64,
    commands: Vec<ZfsCommand>,
    failing_sends: HashSet<String>,
}

impl FakeState {
    fn add_snapshot(&mut self, name: String) {
        self.next_txg += 1;
        self.snapshots.push(RawSnapshot {
            name,
            createtxg: self.next_txg,
        });
    }

    fn has_snapshot(&self, name: &str) -> bool {
        self.snapshots.iter().any(|s| s.name == name)
    }

    /// Snapshots of one dataset, oldest created first
    fn snapshots_of(&self, dataset_path: &str) -> Vec<&RawSnapshot> {
        let prefix = format!("{}@", dataset_path);
        let mut found: Vec<_> = self
            .snapshots
            .iter()
            .filter(|s| s.name.starts_with(&prefix))
            .collect();
        found.sort_by_key(|s| s.createtxg);
        found
    }

    /// `zfs receive -F` of an incremental stream: the base must exist on the
    /// target, and anything newer than it is rolled back.
    fn receive_incremental(&mut self, base: &str, target: &str) -> Option<String> {
        let (_, base_name) = base.split_once('@')?;
        let on_target = format!("{}@{}", target, base_name);
        let base_txg = self
            .snapshots_of(target)
            .iter()
            .find(|s| s.name == on_target)
            .map(|s| s.createtxg)?;

        let prefix = format!("{}@", target);
        self.snapshots
            .retain(|s| !s.name.starts_with(&prefix) || s.createtxg <= base_txg);
        Some(on_target)
    }
}

impl FakeZfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pool/dataset` (and the pool root)
    pub fn with_dataset(self, pool: &str, dataset: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if !state.datasets.iter().any(|d| d == pool) {
                state.datasets.push(pool.to_string());
            }
            state.datasets.push(format!("{}/{}", pool, dataset));
        }
        self
    }

    /// Add an existing snapshot, e.g. `tank/a@name`
    pub fn with_snapshot(self, full_name: &str) -> Self {
        self.state.lock().unwrap().add_snapshot(full_name.to_string());
        self
    }

    /// Make every send into `target` (e.g. `backup/a`) fail
    pub fn failing_send_to(self, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_sends
            .insert(target.to_string());
        self
    }

    /// Let sends into `target` succeed again
    pub fn heal_sends_to(&self, target: &str) {
        self.state.lock().unwrap().failing_sends.remove(target);
    }

    pub fn commands(&self) -> Vec<ZfsCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn snapshot_names(&self, dataset_path: &str) -> Vec<String> {
        let prefix = format!("{}@", dataset_path);
        self.state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| s.name.starts_with(&prefix))
            .map(|s| s.name.clone())
            .collect()
    }
}

#[async_trait]
impl ZfsBackend for FakeZfs {
    async fn list_datasets(&self, pool: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.datasets.iter().any(|d| d == pool) {
            return Err(Error::Command {
                command: format!("zfs list -H -o name -d 1 {}", pool),
                stderr: format!("cannot open '{}': dataset does not exist", pool),
            });
        }
        let prefix = format!("{}/", pool);
        Ok(state
            .datasets
            .iter()
            .filter(|d| *d == pool || d.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn list_snapshots(&self, pool: &str) -> Result<Vec<RawSnapshot>> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{}/", pool);
        let root = format!("{}@", pool);
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.name.starts_with(&prefix) || s.name.starts_with(&root))
            .cloned()
            .collect())
    }

    async fn execute(&self, command: &ZfsCommand) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.clone());

        match command {
            ZfsCommand::Snapshot { snapshot } => {
                if state.has_snapshot(snapshot) {
                    return Ok(CommandOutput::failed(format!(
                        "cannot create snapshot '{}': dataset already exists",
                        snapshot
                    )));
                }
                state.add_snapshot(snapshot.clone());
            }
            ZfsCommand::Send {
                snapshot,
                base,
                target,
            } => {
                if state.failing_sends.contains(target) {
                    return Ok(CommandOutput::failed(format!(
                        "cannot receive new filesystem stream: out of space in {}",
                        target
                    )));
                }
                match base {
                    Some(base) => {
                        if !state.has_snapshot(base) {
                            return Ok(CommandOutput::failed(format!(
                                "incremental source {} does not exist",
                                base
                            )));
                        }
                        if state.receive_incremental(base, target).is_none() {
                            return Ok(CommandOutput::failed(format!(
                                "cannot receive incremental stream: destination {} has no snapshot matching {}",
                                target, base
                            )));
                        }
                    }
                    None => {
                        if !state.snapshots_of(target).is_empty() {
                            return Ok(CommandOutput::failed(format!(
                                "cannot receive new filesystem stream: destination '{}' exists",
                                target
                            )));
                        }
                    }
                }
                let (_, name) = snapshot
                    .split_once('@')
                    .ok_or_else(|| Error::System(format!("not a snapshot: {}", snapshot)))?;
                let received = format!("{}@{}", target, name);
                if !state.datasets.contains(target) {
                    state.datasets.push(target.clone());
                }
                state.add_snapshot(received);
            }
            ZfsCommand::Destroy { snapshot } => {
                let before = state.snapshots.len();
                state.snapshots.retain(|s| &s.name != snapshot);
                if state.snapshots.len() == before {
                    return Ok(CommandOutput::failed(format!(
                        "could not find any snapshots to destroy; check snapshot names: {}",
                        snapshot
                    )));
                }
            }
        }

        Ok(CommandOutput::ok())
    }
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// `pool/dataset@<tag>_<timestamp>` for the tank -> backup pair
pub fn tagged(pool: &str, dataset: &str, ts: NaiveDateTime) -> String {
    let tag = SnapshotTag::for_pools("tank", "backup");
    format!("{}/{}@{}", pool, dataset, tag.snapshot_name(&ts))
}

pub fn config(mode: RunMode, keep: u32) -> SyncConfig {
    let options = SyncOptions {
        source: "tank".to_string(),
        destination: "backup".to_string(),
        mode: Some(mode),
        keep_snapshots: Some(keep),
        ..Default::default()
    };
    SyncConfig::resolve(options, FileConfig::default()).unwrap()
}
