//! Best-effort secondary copy of processed product summaries.

use crate::{
    pipeline::VectorRecord, qdrant::compute_description_hash, stats::current_timestamp_rfc3339,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

/// Errors raised while writing or reading backup summaries.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Filesystem access failed.
    #[error("backup I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A summary could not be encoded or decoded.
    #[error("backup serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Compact record kept outside the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Product identifier.
    pub product_id: String,
    /// Rendered description.
    pub description: String,
    /// SHA-256 of the description, for change detection.
    pub description_hash: String,
    /// Publication timestamp.
    pub date: String,
    /// Sales platform.
    pub platform: String,
    /// Store name.
    pub store_name: String,
    /// When this summary was written.
    pub updated_at: String,
}

impl BackupSummary {
    /// Summarize a processed record.
    pub fn from_record(record: &VectorRecord) -> Self {
        Self {
            product_id: record.id.clone(),
            description: record.description.clone(),
            description_hash: compute_description_hash(&record.description),
            date: record.date.clone(),
            platform: record.platform.clone(),
            store_name: record.store_name.clone(),
            updated_at: current_timestamp_rfc3339(),
        }
    }
}

/// Destination for backup summaries. Failures never affect the main pipeline.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Insert or replace the summary for `summary.product_id`.
    async fn upsert(&self, summary: &BackupSummary) -> Result<(), BackupError>;
}

/// Backup store that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackupStore;

#[async_trait]
impl BackupStore for NoopBackupStore {
    async fn upsert(&self, _summary: &BackupSummary) -> Result<(), BackupError> {
        Ok(())
    }
}

/// Appends summaries to a JSON-lines file; the last line for an id wins.
#[derive(Debug)]
pub struct JsonlBackupStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlBackupStore {
    /// Create a store writing to `path`. Parent directories are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file and keep the most recent summary per product id.
    pub async fn load_latest(&self) -> Result<HashMap<String, BackupSummary>, BackupError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };

        let mut latest = HashMap::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let summary: BackupSummary = serde_json::from_str(line)?;
            latest.insert(summary.product_id.clone(), summary);
        }
        Ok(latest)
    }
}

#[async_trait]
impl BackupStore for JsonlBackupStore {
    async fn upsert(&self, summary: &BackupSummary) -> Result<(), BackupError> {
        let mut line = serde_json::to_vec(summary)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
