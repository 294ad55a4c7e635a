//! Snapshot inventory
//!
//! Typed view of the snapshots this tool created on one pool, indexed by
//! dataset and ordered oldest-first by creation transaction group. The
//! timestamp embedded in each name only breaks ties: a wall clock that steps
//! backwards (a DST fall-back, NTP correction) must not reorder history.

use crate::storage::zfs::{RawSnapshot, ZfsBackend};
use chrono::NaiveDateTime;
use poolsync_common::{format_snapshot_timestamp, parse_snapshot_timestamp, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Name prefix scoping snapshots to one (source, destination) pool pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotTag(String);

impl SnapshotTag {
    pub fn for_pools(source: &str, destination: &str) -> Self {
        Self(format!("poolsync-{}-to-{}", source, destination))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short snapshot name (the part after `@`) for a run timestamp
    pub fn snapshot_name(&self, timestamp: &NaiveDateTime) -> String {
        format!("{}_{}", self.0, format_snapshot_timestamp(timestamp))
    }

    /// Timestamp of a short snapshot name, or `None` if this tag did not create it
    pub fn parse_timestamp(&self, short_name: &str) -> Option<NaiveDateTime> {
        short_name
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(parse_snapshot_timestamp)
    }
}

impl std::fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tool-created snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRecord {
    /// `pool/dataset@name`
    pub full_name: String,
    /// Dataset relative to its pool
    pub dataset: String,
    /// Short name after `@`
    pub name: String,
    pub timestamp: NaiveDateTime,
    /// Creation transaction group; primary ordering key
    pub createtxg: u64,
}

impl SnapshotRecord {
    pub fn new(
        pool: &str,
        dataset: &str,
        name: &str,
        timestamp: NaiveDateTime,
        createtxg: u64,
    ) -> Self {
        Self {
            full_name: format!("{}/{}@{}", pool, dataset, name),
            dataset: dataset.to_string(),
            name: name.to_string(),
            timestamp,
            createtxg,
        }
    }

    /// Build a record from a listing row; `None` for the pool root, other
    /// pools, and snapshots this tag did not create.
    pub fn from_raw(pool: &str, raw: &RawSnapshot, tag: &SnapshotTag) -> Option<Self> {
        let (dataset_path, name) = raw.name.split_once('@')?;
        let dataset = dataset_path.strip_prefix(pool)?.strip_prefix('/')?;
        if dataset.is_empty() {
            return None;
        }
        let timestamp = tag.parse_timestamp(name)?;

        Some(Self {
            full_name: raw.name.clone(),
            dataset: dataset.to_string(),
            name: name.to_string(),
            timestamp,
            createtxg: raw.createtxg,
        })
    }

    /// True when `full_name` names a snapshot rather than a bare dataset
    pub fn is_snapshot_identifier(&self) -> bool {
        match self.full_name.split_once('@') {
            Some((dataset, name)) => !dataset.is_empty() && !name.is_empty(),
            None => false,
        }
    }

    fn sort_key(&self) -> (u64, NaiveDateTime, &str) {
        (self.createtxg, self.timestamp, &self.full_name)
    }
}

/// Tool-created snapshots of one pool, per dataset, oldest first
#[derive(Debug, Clone, Default)]
pub struct SnapshotInventory {
    pool: String,
    by_dataset: BTreeMap<String, Vec<SnapshotRecord>>,
}

impl SnapshotInventory {
    pub fn new(pool: &str) -> Self {
        Self {
            pool: pool.to_string(),
            by_dataset: BTreeMap::new(),
        }
    }

    /// Query the pool and keep only snapshots carrying `tag`
    pub async fn capture(backend: &dyn ZfsBackend, pool: &str, tag: &SnapshotTag) -> Result<Self> {
        let raw = backend.list_snapshots(pool).await?;
        let inventory = Self::from_raw(pool, &raw, tag);
        debug!(
            pool,
            listed = raw.len(),
            tagged = inventory.total(),
            "Captured snapshot inventory"
        );
        Ok(inventory)
    }

    pub fn from_raw(pool: &str, raw: &[RawSnapshot], tag: &SnapshotTag) -> Self {
        let records = raw
            .iter()
            .filter_map(|snapshot| SnapshotRecord::from_raw(pool, snapshot, tag));
        Self::from_records(pool, records)
    }

    pub fn from_records(pool: &str, records: impl IntoIterator<Item = SnapshotRecord>) -> Self {
        let mut inventory = Self::new(pool);
        for record in records {
            inventory
                .by_dataset
                .entry(record.dataset.clone())
                .or_default()
                .push(record);
        }
        for records in inventory.by_dataset.values_mut() {
            records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        }
        inventory
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Snapshots of `dataset`, oldest first
    pub fn snapshots(&self, dataset: &str) -> &[SnapshotRecord] {
        self.by_dataset
            .get(dataset)
            .map(|records| records.as_slice())
            .unwrap_or(&[])
    }

    pub fn count(&self, dataset: &str) -> usize {
        self.snapshots(dataset).len()
    }

    /// Most recent snapshot of `dataset`
    pub fn latest(&self, dataset: &str) -> Option<&SnapshotRecord> {
        self.snapshots(dataset).last()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.by_dataset.keys().map(|name| name.as_str())
    }

    pub fn total(&self) -> usize {
        self.by_dataset.values().map(|records| records.len()).sum()
    }

    /// Add a record, keeping order. Ignored if the identifier is already present.
    pub fn insert(&mut self, record: SnapshotRecord) {
        let records = self.by_dataset.entry(record.dataset.clone()).or_default();
        if records.iter().any(|r| r.full_name == record.full_name) {
            return;
        }
        let position = records
            .iter()
            .position(|r| r.sort_key() > record.sort_key())
            .unwrap_or(records.len());
        records.insert(position, record);
    }

    /// Drop a record by identifier; returns whether it was present
    pub fn remove(&mut self, full_name: &str) -> bool {
        for records in self.by_dataset.values_mut() {
            if let Some(position) = records.iter().position(|r| r.full_name == full_name) {
                records.remove(position);
                return true;
            }
        }
        false
    }
}

/// A dataset is on its first run when the destination holds none of its
/// tool-created snapshots; source history does not matter.
pub fn is_first_run(destination: &SnapshotInventory, dataset: &str) -> bool {
    destination.count(dataset) == 0
}
