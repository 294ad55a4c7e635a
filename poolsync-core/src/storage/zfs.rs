//! ZFS command-line collaborator
//! Typed queries and mutating commands over the `zfs` tool

use async_trait::async_trait;
use poolsync_common::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

/// Raw snapshot row as reported by `zfs list -t snapshot`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSnapshot {
    pub name: String,
    pub createtxg: u64,
}

/// A mutating `zfs` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZfsCommand {
    /// `zfs snapshot <snapshot>`
    Snapshot { snapshot: String },
    /// `zfs send [-i <base>] <snapshot> | zfs receive [-F] <target>`
    Send {
        snapshot: String,
        base: Option<String>,
        target: String,
    },
    /// `zfs destroy <snapshot>`
    Destroy { snapshot: String },
}

impl ZfsCommand {
    /// Argument vector for `zfs send`
    fn send_args(snapshot: &str, base: Option<&str>) -> Vec<String> {
        let mut args = vec!["send".to_string()];
        if let Some(base) = base {
            args.push("-i".to_string());
            args.push(base.to_string());
        }
        args.push(snapshot.to_string());
        args
    }

    /// Argument vector for `zfs receive`. Incremental streams force a
    /// rollback of the target to its latest snapshot first.
    fn receive_args(target: &str, incremental: bool) -> Vec<String> {
        let mut args = vec!["receive".to_string()];
        if incremental {
            args.push("-F".to_string());
        }
        args.push(target.to_string());
        args
    }
}

impl std::fmt::Display for ZfsCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snapshot { snapshot } => write!(f, "zfs snapshot {}", snapshot),
            Self::Send { snapshot, base, target } => write!(
                f,
                "zfs {} | zfs {}",
                Self::send_args(snapshot, base.as_deref()).join(" "),
                Self::receive_args(target, base.is_some()).join(" ")
            ),
            Self::Destroy { snapshot } => write!(f, "zfs destroy {}", snapshot),
        }
    }
}

/// Outcome of an executed command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
        }
    }
}

/// Storage operations the sync engine depends on
#[async_trait]
pub trait ZfsBackend: Send + Sync {
    /// Full names of the datasets nested directly under `pool` (including the pool itself)
    async fn list_datasets(&self, pool: &str) -> Result<Vec<String>>;

    /// Every snapshot below `pool`, recursively
    async fn list_snapshots(&self, pool: &str) -> Result<Vec<RawSnapshot>>;

    /// Run a mutating command. A non-zero exit is reported through
    /// `CommandOutput`, not as an `Err`; `Err` means the command could not run.
    async fn execute(&self, command: &ZfsCommand) -> Result<CommandOutput>;
}

/// `zfs` invoked through `tokio::process`
pub struct ZfsCli {
    binary: String,
}

impl ZfsCli {
    pub fn new() -> Self {
        Self::with_binary("zfs")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if the zfs binary can be executed
    pub fn check_zfs_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    async fn query(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(command = %command, "Running query");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::System(format!("Failed to run {}: {}", command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Query failed: {}: {}", command, stderr);
            return Err(Error::Command { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_simple(&self, args: Vec<String>) -> Result<CommandOutput> {
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::System(format!("Failed to run zfs {}: {}", args.join(" "), e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Pipe `zfs send` into `zfs receive`
    async fn run_pipeline(
        &self,
        snapshot: &str,
        base: Option<&str>,
        target: &str,
    ) -> Result<CommandOutput> {
        let mut sender = Command::new(&self.binary)
            .args(ZfsCommand::send_args(snapshot, base))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::System(format!("Failed to start zfs send: {}", e)))?;

        let stream: Stdio = sender
            .stdout
            .take()
            .ok_or_else(|| Error::System("zfs send produced no stdout handle".to_string()))?
            .try_into()?;

        let receiver = Command::new(&self.binary)
            .args(ZfsCommand::receive_args(target, base.is_some()))
            .stdin(stream)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::System(format!("Failed to start zfs receive: {}", e)))?;

        let (sent, received) = tokio::join!(sender.wait_with_output(), receiver.wait_with_output());
        let sent = sent.map_err(|e| Error::System(format!("zfs send process error: {}", e)))?;
        let received =
            received.map_err(|e| Error::System(format!("zfs receive process error: {}", e)))?;

        let stderr = [&sent.stderr, &received.stderr]
            .iter()
            .map(|s| String::from_utf8_lossy(s).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        Ok(CommandOutput {
            success: sent.status.success() && received.status.success(),
            stderr,
        })
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ZfsBackend for ZfsCli {
    async fn list_datasets(&self, pool: &str) -> Result<Vec<String>> {
        let stdout = self
            .query(&["list", "-H", "-o", "name", "-d", "1", pool])
            .await?;
        Ok(parse_dataset_list(&stdout))
    }

    async fn list_snapshots(&self, pool: &str) -> Result<Vec<RawSnapshot>> {
        let stdout = self
            .query(&[
                "list", "-H", "-p", "-t", "snapshot", "-o", "name,createtxg", "-r", pool,
            ])
            .await?;
        Ok(parse_snapshot_list(&stdout))
    }

    async fn execute(&self, command: &ZfsCommand) -> Result<CommandOutput> {
        match command {
            ZfsCommand::Snapshot { snapshot } => {
                self.run_simple(vec!["snapshot".to_string(), snapshot.clone()])
                    .await
            }
            ZfsCommand::Send { snapshot, base, target } => {
                self.run_pipeline(snapshot, base.as_deref(), target).await
            }
            ZfsCommand::Destroy { snapshot } => {
                self.run_simple(vec!["destroy".to_string(), snapshot.clone()])
                    .await
            }
        }
    }
}

/// Parse `zfs list -H -o name` output
pub fn parse_dataset_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Parse `zfs list -H -p -t snapshot -o name,createtxg` output
pub fn parse_snapshot_list(output: &str) -> Vec<RawSnapshot> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let createtxg = parts
                .next()
                .and_then(|txg| txg.trim().parse().ok())
                .unwrap_or(0);
            Some(RawSnapshot {
                name: name.to_string(),
                createtxg,
            })
        })
        .collect()
}
