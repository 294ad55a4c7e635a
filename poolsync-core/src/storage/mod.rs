//! Storage collaborators
//!
//! The sync engine reaches ZFS only through the `ZfsBackend` trait.

pub mod zfs;

pub use zfs::{CommandOutput, RawSnapshot, ZfsBackend, ZfsCli, ZfsCommand};
