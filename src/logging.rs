//! Tracing setup for the ingestion binary.
//!
//! Console output is always on. A second, plain-text layer writes to a log file unless
//! `PRODUCT_INGEST_LOG_FILE` is `off`; `PRODUCT_INGEST_LOG_ROTATION` picks `never` (default),
//! `hourly`, or `daily` rollover. Pipeline runs open an `ingest_run` span, so every line logged
//! by a run carries its `run_id` in both layers.
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "product-ingest.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Destination of the file layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFile {
    /// Console only.
    Disabled,
    /// Append to `file_name` inside `directory`.
    Path {
        /// Directory created on startup when missing.
        directory: PathBuf,
        /// File name, used as the prefix when the file rotates.
        file_name: String,
    },
}

impl LogFile {
    fn from_path(path: &Path) -> Self {
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        Self::Path {
            directory,
            file_name,
        }
    }
}

/// Rollover schedule of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// One file for the lifetime of the process.
    Never,
    /// New file every hour.
    Hourly,
    /// New file every day.
    Daily,
}

impl FromStr for LogRotation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            _ => Err(()),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Logging options, read before the pipeline configuration so config errors are logged too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives from `RUST_LOG`; `info` when unset.
    pub filter: String,
    /// File layer destination.
    pub file: LogFile,
    /// File rollover schedule.
    pub rotation: LogRotation,
}

impl LogSettings {
    /// Read the settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the settings through an arbitrary key lookup. Unparseable values fall back to
    /// defaults; logging is never a reason to refuse to start.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let file = match value("PRODUCT_INGEST_LOG_FILE") {
            Some(path) if path.eq_ignore_ascii_case("off") => LogFile::Disabled,
            Some(path) => LogFile::from_path(Path::new(&path)),
            None => LogFile::Path {
                directory: PathBuf::from(DEFAULT_LOG_DIR),
                file_name: DEFAULT_LOG_FILE.to_string(),
            },
        };
        let rotation = value("PRODUCT_INGEST_LOG_ROTATION")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogRotation::Never);

        Self {
            filter: value("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            file,
            rotation,
        }
    }
}

/// Install the global subscriber from the process environment.
pub fn init_tracing() {
    init_with(&LogSettings::from_env());
}

/// Install the global subscriber: a compact stdout layer plus the optional file layer.
///
/// Keeps the non-blocking writer guard alive for the process lifetime.
pub fn init_with(settings: &LogSettings) {
    let env_filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = file_writer(settings).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

fn file_writer(settings: &LogSettings) -> Option<NonBlocking> {
    let appender = build_appender(settings)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

/// Build the file appender, or `None` when the file layer is off or cannot be opened.
fn build_appender(settings: &LogSettings) -> Option<RollingFileAppender> {
    let LogFile::Path {
        directory,
        file_name,
    } = &settings.file
    else {
        return None;
    };

    if let Err(err) = std::fs::create_dir_all(directory) {
        eprintln!("Failed to create log directory {}: {err}", directory.display());
        return None;
    }

    match RollingFileAppender::builder()
        .rotation(settings.rotation.into())
        .filename_prefix(file_name)
        .build(directory)
    {
        Ok(appender) => Some(appender),
        Err(err) => {
            eprintln!("Failed to open log file {file_name}: {err}");
            None
        }
    }
}
