//! Snapshot sync engine
//!
//! Control flow of a run:
//! - resolver: which datasets to process
//! - inventory: tool-created snapshots on each pool before the run
//! - lifecycle: snapshot every dataset, then send each one
//! - retention: trim history on both pools
//!
//! All mutating commands go through the mode-aware `executor`.

pub mod executor;
pub mod inventory;
pub mod lifecycle;
pub mod resolver;
pub mod retention;
pub mod run;

pub use executor::{Executor, OpStatus};
pub use inventory::{is_first_run, SnapshotInventory, SnapshotRecord, SnapshotTag};
pub use lifecycle::{common_base, DatasetOutcome, DatasetState, LifecycleEngine};
pub use resolver::{resolve_datasets, ExclusionPolicy};
pub use retention::{PruneReport, RetentionPruner};
pub use run::{SyncReport, SyncRun};
