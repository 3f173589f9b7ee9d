//! JSON run reports.

use crate::stats::PipelineStats;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};

/// Failure writing a run report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Filesystem failure.
    #[error("failed to write report {path}: {source}")]
    Io {
        /// Report destination.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Statistics could not be serialized.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Default report file name, stamped with the current UTC time.
pub fn default_report_name() -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000_000000".to_string());
    format!("streaming_pipeline_stats_{stamp}.json")
}

/// Write `stats` as pretty-printed JSON to `path`, creating parent directories.
pub async fn save_report(stats: &PipelineStats, path: &Path) -> Result<(), ReportError> {
    let body = serde_json::to_vec_pretty(stats)?;
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(parent) = parent {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ReportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!(path = %path.display(), "Run report saved");
    Ok(())
}
