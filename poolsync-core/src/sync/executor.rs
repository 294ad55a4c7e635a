//! Mode-aware runner every mutating zfs command goes through

use crate::config::RunMode;
use crate::storage::zfs::{ZfsBackend, ZfsCommand};
use serde::Serialize;
use tracing::{error, info};

/// Result of one attempted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum OpStatus {
    Succeeded,
    Failed(String),
    /// Echoed in dry-run mode, not executed
    Planned,
    NotAttempted,
}

impl OpStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, OpStatus::Failed(_))
    }

    /// Succeeded, or would have been executed in dry-run mode
    pub fn went_ahead(&self) -> bool {
        matches!(self, OpStatus::Succeeded | OpStatus::Planned)
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpStatus::Succeeded => write!(f, "ok"),
            OpStatus::Failed(reason) => write!(f, "failed: {}", reason),
            OpStatus::Planned => write!(f, "planned"),
            OpStatus::NotAttempted => write!(f, "-"),
        }
    }
}

pub struct Executor<'a> {
    backend: &'a dyn ZfsBackend,
    mode: RunMode,
}

impl<'a> Executor<'a> {
    pub fn new(backend: &'a dyn ZfsBackend, mode: RunMode) -> Self {
        Self { backend, mode }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Execute `command`, or only echo it in dry-run mode
    pub async fn run(&self, command: &ZfsCommand) -> OpStatus {
        if !self.mode.executes_commands() {
            info!("[dry-run] {}", command);
            return OpStatus::Planned;
        }

        info!(command = %command, "Executing");

        match self.backend.execute(command).await {
            Ok(output) if output.success => OpStatus::Succeeded,
            Ok(output) => {
                let reason = if output.stderr.is_empty() {
                    "exited with non-zero status".to_string()
                } else {
                    output.stderr
                };
                error!(command = %command, "Command failed: {}", reason);
                OpStatus::Failed(reason)
            }
            Err(e) => {
                error!(command = %command, "Command could not run: {}", e);
                OpStatus::Failed(e.to_string())
            }
        }
    }
}
