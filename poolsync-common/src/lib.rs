//! Common types and utilities shared between poolsync-core and poolsync-cli

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp suffix embedded in every snapshot name.
/// Lexicographic order of formatted values equals chronological order.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Role a pool plays in a sync run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    #[default]
    Source,
    Destination,
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// Format a run timestamp as a snapshot suffix
pub fn format_snapshot_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string()
}

/// Parse a snapshot suffix back into a timestamp
pub fn parse_snapshot_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, SNAPSHOT_TIMESTAMP_FORMAT).ok()
}

/// Poolsync error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("System error: {0}")]
    System(String),

    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap();
        let formatted = format_snapshot_timestamp(&ts);
        assert_eq!(formatted, "2024-03-09_07-05-01");
        assert_eq!(parse_snapshot_timestamp(&formatted), Some(ts));
    }

    #[test]
    fn test_timestamp_sorts_chronologically() {
        let earlier = "2024-09-30_23-59-59";
        let later = "2024-10-01_00-00-00";
        assert!(earlier < later);
        assert!(parse_snapshot_timestamp(earlier) < parse_snapshot_timestamp(later));
    }

    #[test]
    fn test_rejects_foreign_suffix() {
        assert!(parse_snapshot_timestamp("manual-before-upgrade").is_none());
        assert!(parse_snapshot_timestamp("2024-03-09T07:05:01Z").is_none());
    }

    #[test]
    fn test_pool_role_serde() {
        let json = serde_json::to_string(&PoolRole::Destination).unwrap();
        assert_eq!(json, "\"destination\"");
        assert_eq!(PoolRole::Source.to_string(), "source");
    }

    #[test]
    fn test_command_error_display() {
        let err = Error::Command {
            command: "zfs destroy tank/a@x".to_string(),
            stderr: "dataset is busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `zfs destroy tank/a@x` failed: dataset is busy"
        );
    }
}
