//! Poolsync core library
//!
//! Snapshot a source ZFS pool, replicate the snapshots into a destination
//! pool on the same host, and prune both sides to a retention window.

pub mod config;
pub mod lock;
pub mod logging;
pub mod shutdown;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, FileConfig, RunMode, SyncConfig, SyncOptions};
pub use lock::{LockStatus, PidLock};
pub use storage::{ZfsBackend, ZfsCli, ZfsCommand};
pub use sync::{SyncReport, SyncRun};
