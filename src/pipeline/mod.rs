//! Concurrent streaming ingestion of product records.
//!
//! Raw records pass through the [`DuplicateFilter`], are enriched concurrently by the
//! [`WorkerPool`], queued on the insertion queue, and written in batches by the single
//! [`InsertionWorker`]. [`IngestionPipeline`] wires one run together.

pub mod dedupe;
pub mod description;
pub mod image_cache;
pub mod image_opt;
pub mod insertion;
pub mod pool;
pub mod processor;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

pub use dedupe::{DuplicateFilter, FilteredRecords, Partition};
pub use description::render_description;
pub use image_cache::{HttpImageFetcher, ImageCache, ImageFetchError, ImageFetcher};
pub use image_opt::ImageOptimizer;
pub use insertion::{
    InsertionReceiver, InsertionSender, InsertionSummary, InsertionWorker, QueueMessage,
    WorkerState, insertion_queue,
};
pub use pool::{PoolSummary, WorkerPool};
pub use processor::RecordProcessor;
pub use service::{Collaborators, IngestionPipeline};
pub use types::{PipelineError, ProcessingError, RawRecord, VectorRecord};

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Upper bound on concurrently processed records.
    pub max_workers: usize,
    /// Records per bulk insert.
    pub insert_batch_size: usize,
    /// Identifiers per existence query.
    pub duplicate_check_batch_size: usize,
    /// Wall-clock budget for one record.
    pub task_timeout: Duration,
    /// Idle period after which a partial batch is flushed.
    pub insert_idle_timeout: Duration,
    /// Time allowed for the insertion worker to drain after shutdown.
    pub shutdown_timeout: Duration,
    /// Largest image edge sent to the labeler.
    pub image_max_dimension: u32,
    /// JPEG quality of images sent to the labeler.
    pub image_jpeg_quality: u8,
    /// Optional cap on cached images.
    pub image_cache_max_entries: Option<usize>,
    /// Interval between progress log lines.
    pub progress_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_workers: 1,
            insert_batch_size: 5,
            duplicate_check_batch_size: 100,
            task_timeout: Duration::from_secs(180),
            insert_idle_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(60),
            image_max_dimension: 512,
            image_jpeg_quality: 90,
            image_cache_max_entries: None,
            progress_interval: Duration::from_secs(10),
        }
    }
}
