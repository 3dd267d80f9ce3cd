//! Logging setup for binaries that embed the realtime client.
//!
//! Writes to stderr, or to a file through a non-blocking appender. The
//! filter comes from `KRUSHR_LOG_FILTER` when set; otherwise `--log-level`
//! raises verbosity for the Krushr targets only and leaves every other
//! crate at `info`.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_VAR: &str = "KRUSHR_LOG_FILTER";

/// Targets whose verbosity follows the requested level.
const KRUSHR_TARGETS: &[&str] = &["krushr_realtime", "krushr_sync", "realtime"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `EnvFilter` directives for this level.
    fn directives(self) -> String {
        let own = match self {
            LogLevel::Error => return "error".to_string(),
            LogLevel::Warn => return "warn".to_string(),
            LogLevel::Info => return "info".to_string(),
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        let mut directives = String::from("info");
        for target in KRUSHR_TARGETS {
            directives.push_str(&format!(",{target}={own}"));
        }
        directives
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        match std::env::var(LOG_FILTER_VAR) {
            Ok(custom) if !custom.trim().is_empty() => EnvFilter::new(custom),
            _ => EnvFilter::new(self.level.directives()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Keeps the appender's worker alive; its presence also marks the
/// subscriber as installed.
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber once; repeated calls return `Ok(())`.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    tracing::debug!(target: "realtime::telemetry", level = ?config.level, file = ?config.file, "logging initialized");
    Ok(())
}
