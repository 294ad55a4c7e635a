//! Poolsync CLI
//!
//! Snapshot every dataset of a ZFS pool, replicate the snapshots into a
//! second pool on the same host, and prune both sides to a retention window.

mod output;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use output::OutputFormat;
use poolsync_core::config::{FileConfig, RunMode, SyncConfig, SyncOptions};
use poolsync_core::lock::{LockStatus, PidLock};
use poolsync_core::logging::LoggingConfig;
use poolsync_core::shutdown::{self, Interruptible, SignalListener};
use poolsync_core::storage::ZfsCli;
use poolsync_core::sync::SyncRun;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pool to snapshot and replicate from
    #[arg(short, long, required_unless_present = "sample_config")]
    source: Option<String>,

    /// Pool to replicate into
    #[arg(short, long, required_unless_present = "sample_config")]
    destination: Option<String>,

    /// Echo commands to the console without executing them
    #[arg(short = 'D', long)]
    dry_run: bool,

    /// Only log warnings and errors
    #[arg(short = 'S', long)]
    silent: bool,

    /// Log to the console as well as the log file
    #[arg(short, long)]
    verbose: bool,

    /// Snapshots to keep per dataset on each pool
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    keep_snapshots: Option<u32>,

    /// Space-separated datasets to process instead of every child of the source
    #[arg(long, visible_alias = "vols", value_name = "NAMES")]
    datasets: Option<String>,

    /// Skip datasets matching this regex (repeatable, replaces the configured list)
    #[arg(short = 'x', long, value_name = "REGEX")]
    exclude: Vec<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Summary format (table, json)
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Print a sample configuration file and exit
    #[arg(long)]
    sample_config: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        RunMode::from_flags(self.dry_run, self.verbose, self.silent)
    }

    fn options(&self) -> SyncOptions {
        SyncOptions {
            source: self.source.clone().unwrap_or_default(),
            destination: self.destination.clone().unwrap_or_default(),
            mode: Some(self.mode()),
            keep_snapshots: self.keep_snapshots,
            datasets: self.datasets.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

/// Accept the single-dash `-vols` spelling as `--datasets`
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if arg == "-vols" {
                "--datasets".to_string()
            } else if let Some(value) = arg.strip_prefix("-vols=") {
                format!("--datasets={}", value)
            } else {
                arg
            }
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    if cli.sample_config {
        print!("{}", FileConfig::generate_sample());
        return ExitCode::SUCCESS;
    }

    let config = match FileConfig::load(cli.config.as_deref())
        .and_then(|file| SyncConfig::resolve(cli.options(), file))
    {
        Ok(config) => config,
        // Exits with status 2 after printing usage
        Err(e) => Cli::command()
            .error(clap::error::ErrorKind::ValueValidation, e)
            .exit(),
    };

    let _log_guard = match LoggingConfig::for_run(&config).init() {
        Ok(guard) => guard,
        Err(e) => {
            output::print_error(&format!("Failed to initialize logging: {}", e));
            return ExitCode::FAILURE;
        }
    };

    match run(&config, OutputFormat::from_str(&cli.output)).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &SyncConfig, format: OutputFormat) -> Result<ExitCode> {
    let zfs = ZfsCli::with_binary(&config.zfs_binary);
    if !zfs.check_zfs_available() {
        anyhow::bail!("'{}' could not be executed", config.zfs_binary);
    }

    let mut signals = SignalListener::register().context("Failed to register signal handlers")?;

    let lock = match PidLock::acquire(&config.lock_dir, &config.source)? {
        LockStatus::Acquired(lock) => lock,
        LockStatus::Held { pid } => {
            info!(?pid, source = %config.source, "Another run for this pool is active, exiting");
            return Ok(ExitCode::SUCCESS);
        }
    };

    // UTC so the embedded timestamp never steps back across a DST change
    let started_at = chrono::Utc::now().naive_utc();
    let sync = SyncRun::new(config, &zfs, started_at);

    let report = match signals.run_guarded(lock, sync.execute()).await {
        Interruptible::Completed(result) => result?,
        Interruptible::Interrupted(signal) => {
            return Ok(ExitCode::from(shutdown::exit_code(signal) as u8));
        }
    };

    if config.mode.console_output() {
        output::print_report(&report, format)?;
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        let args = std::iter::once("poolsync")
            .chain(args.iter().copied())
            .map(String::from);
        Cli::try_parse_from(normalize_args(args))
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_keep_is_usage_error() {
        let err = parse(&["-s", "tank", "-d", "backup", "-k", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_destination_is_usage_error() {
        let err = parse(&["-s", "tank"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = parse(&["-s", "tank", "-d", "backup", "--frobnicate"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_legacy_vols_flag() {
        let cli = parse(&["-s", "tank", "-d", "backup", "-vols", "vm-100-disk-0 vm-101-disk-0"]).unwrap();
        assert_eq!(cli.datasets.as_deref(), Some("vm-100-disk-0 vm-101-disk-0"));

        let cli = parse(&["-s", "tank", "-d", "backup", "--vols", "a"]).unwrap();
        assert_eq!(cli.datasets.as_deref(), Some("a"));
    }

    #[test]
    fn test_mode_precedence() {
        let cli = parse(&["-s", "tank", "-d", "backup", "-S", "-v"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Verbose);

        let cli = parse(&["-s", "tank", "-d", "backup", "-S", "-v", "-D"]).unwrap();
        assert_eq!(cli.mode(), RunMode::DryRun);

        let cli = parse(&["-s", "tank", "-d", "backup"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Normal);
    }

    #[test]
    fn test_options_resolve() {
        let cli = parse(&[
            "-s", "tank", "-d", "backup", "-k", "3", "-x", "^scratch", "--datasets", "a b",
        ])
        .unwrap();
        let config = SyncConfig::resolve(cli.options(), FileConfig::default()).unwrap();

        assert_eq!(config.keep_snapshots, 3);
        assert_eq!(config.datasets, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(config.exclusion.is_excluded("scratch-1"));
        assert!(!config.exclusion.is_excluded("vm-1-swap"));
    }

    #[test]
    fn test_same_pool_rejected() {
        let cli = parse(&["-s", "tank", "-d", "tank"]).unwrap();
        assert!(SyncConfig::resolve(cli.options(), FileConfig::default()).is_err());
    }

    #[test]
    fn test_sample_config_needs_no_pools() {
        let cli = parse(&["--sample-config"]).unwrap();
        assert!(cli.sample_config);
        assert!(cli.source.is_none());
    }
}
