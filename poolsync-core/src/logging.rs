//! Logging configuration module
//! Maps the run mode onto a console layer and an append-only log file layer

use crate::config::{RunMode, SyncConfig};
use std::io;
use std::path::PathBuf;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Level used where the mode table says "all"
const ALL_LEVEL: &str = "info";
/// Level used where the mode table says "warnings/errors only"
const WARN_LEVEL: &str = "warn";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub mode: RunMode,
    pub log_dir: PathBuf,
    pub file_name: String,
}

impl LoggingConfig {
    pub fn for_run(config: &SyncConfig) -> Self {
        Self {
            mode: config.mode,
            log_dir: config.log_dir.clone(),
            file_name: config.log_file_name(),
        }
    }

    /// Console directive, if the mode writes to the console at all
    pub fn console_level(&self) -> Option<&'static str> {
        match self.mode {
            RunMode::Verbose | RunMode::DryRun => Some(ALL_LEVEL),
            RunMode::Normal | RunMode::Silent => None,
        }
    }

    /// Log file directive, if the mode writes to the log file at all
    pub fn file_level(&self) -> Option<&'static str> {
        match self.mode {
            RunMode::Normal | RunMode::Verbose => Some(ALL_LEVEL),
            RunMode::Silent => Some(WARN_LEVEL),
            RunMode::DryRun => None,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }

    /// Install the global subscriber. Keep the returned guard alive until exit
    /// so buffered file output is flushed.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let console_layer = self.console_level().map(|level| {
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stdout)
                .with_filter(build_filter(level, true))
        });

        let (file_layer, guard) = match self.file_level() {
            Some(level) => {
                std::fs::create_dir_all(&self.log_dir)?;
                let file_appender = rolling::never(&self.log_dir, &self.file_name);
                let (writer, guard) = non_blocking(file_appender);

                let layer = fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(build_filter(level, self.mode != RunMode::Silent));

                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!(mode = %self.mode, "Logging initialized");

        Ok(guard)
    }
}

/// `RUST_LOG` may adjust "all" layers; warning-only layers stay fixed
fn build_filter(level: &str, honor_env: bool) -> EnvFilter {
    if honor_env {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    }
}
