//! Configuration management for poolsync
//!
//! A `SyncConfig` is assembled once at startup from, in increasing priority:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables
//! 4. Command-line options

use crate::sync::resolver::ExclusionPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/poolsync/config.toml";

/// Default number of tool-created snapshots kept per dataset
pub const DEFAULT_KEEP_SNAPSHOTS: u32 = 10;

static POOL_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.:-]*$").unwrap()
});

/// How commands are executed and where log output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Execute, log everything to file only
    Normal,
    /// Execute, log everything to console and file
    Verbose,
    /// Execute, log warnings and errors to file only
    Silent,
    /// Echo commands to the console without executing them
    DryRun,
}

impl RunMode {
    /// Resolve conflicting flags: dry-run beats verbose, verbose beats silent
    pub fn from_flags(dry_run: bool, verbose: bool, silent: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else if verbose {
            RunMode::Verbose
        } else if silent {
            RunMode::Silent
        } else {
            RunMode::Normal
        }
    }

    pub fn executes_commands(&self) -> bool {
        !matches!(self, RunMode::DryRun)
    }

    pub fn console_output(&self) -> bool {
        matches!(self, RunMode::Verbose | RunMode::DryRun)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Normal => write!(f, "normal"),
            RunMode::Verbose => write!(f, "verbose"),
            RunMode::Silent => write!(f, "silent"),
            RunMode::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Settings read from the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Directory holding one log file per source pool
    pub log_dir: PathBuf,
    /// Directory holding one PID file per source pool
    pub lock_dir: PathBuf,
    /// Snapshots kept per dataset when not given on the command line
    pub keep_snapshots: u32,
    /// Dataset exclusion patterns (regular expressions)
    pub exclude: Vec<String>,
    /// zfs executable
    pub zfs_binary: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/poolsync"),
            lock_dir: PathBuf::from("/var/run"),
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
            exclude: vec!["swap".to_string()],
            zfs_binary: "zfs".to_string(),
        }
    }
}

impl FileConfig {
    /// Load from an explicit path, `$POOLSYNC_CONFIG`, or the default location,
    /// then apply environment overrides. A missing implicit file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("POOLSYNC_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("POOLSYNC_LOG_DIR") {
            self.log_dir = PathBuf::from(path);
        }
        if let Some(path) = lookup("POOLSYNC_LOCK_DIR") {
            self.lock_dir = PathBuf::from(path);
        }
        if let Some(keep) = lookup("POOLSYNC_KEEP_SNAPSHOTS") {
            self.keep_snapshots = keep.trim().parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "POOLSYNC_KEEP_SNAPSHOTS must be a positive integer, got '{}'",
                    keep
                ))
            })?;
        }
        if let Some(binary) = lookup("POOLSYNC_ZFS_BINARY") {
            self.zfs_binary = binary;
        }
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Options supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub source: String,
    pub destination: String,
    pub mode: Option<RunMode>,
    pub keep_snapshots: Option<u32>,
    /// Space-separated dataset names, used verbatim
    pub datasets: Option<String>,
    /// Replaces the configured exclusion patterns when non-empty
    pub exclude: Vec<String>,
}

/// Everything one sync run needs, built once and passed by reference
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: String,
    pub destination: String,
    pub mode: RunMode,
    pub keep_snapshots: u32,
    pub datasets: Option<Vec<String>>,
    pub exclusion: ExclusionPolicy,
    pub log_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub zfs_binary: String,
}

impl SyncConfig {
    /// Merge command-line options over file settings and validate
    pub fn resolve(options: SyncOptions, file: FileConfig) -> Result<Self, ConfigError> {
        validate_pool_name(&options.source)?;
        validate_pool_name(&options.destination)?;

        if options.source == options.destination {
            return Err(ConfigError::Validation(format!(
                "Source and destination must differ (both are '{}')",
                options.source
            )));
        }

        let keep_snapshots = options.keep_snapshots.unwrap_or(file.keep_snapshots);
        if keep_snapshots < 1 {
            return Err(ConfigError::Validation(
                "keep-snapshots must be at least 1".to_string(),
            ));
        }

        let patterns = if options.exclude.is_empty() {
            file.exclude
        } else {
            options.exclude
        };
        let exclusion = ExclusionPolicy::new(&patterns)
            .map_err(|e| ConfigError::Validation(format!("Invalid exclude pattern: {}", e)))?;

        let datasets = options.datasets.map(|list| {
            list.split_whitespace()
                .map(|name| name.to_string())
                .collect::<Vec<_>>()
        });

        Ok(Self {
            source: options.source,
            destination: options.destination,
            mode: options.mode.unwrap_or(RunMode::Normal),
            keep_snapshots,
            datasets,
            exclusion,
            log_dir: file.log_dir,
            lock_dir: file.lock_dir,
            zfs_binary: file.zfs_binary,
        })
    }

    /// Log file for this source pool
    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.source)
    }
}

fn validate_pool_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation("Pool name cannot be empty".to_string()));
    }

    if !POOL_NAME_REGEX.is_match(name) {
        return Err(ConfigError::Validation(format!(
            "Invalid pool name '{}': must start with a letter and contain only alphanumerics, '_', '-', '.', ':'",
            name
        )));
    }

    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}
