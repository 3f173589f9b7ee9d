//! Run statistics shared by the worker pool and the insertion worker.
//!
//! Every mutation goes through one mutex so a [`StatsAggregator::snapshot`] never observes a
//! half-applied update (for example `inserted` bumped without the matching ids appended).

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

/// Scalar counters tracked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Raw records handed to the pipeline.
    Crawled,
    /// Records skipped because the vector store already holds them.
    Duplicates,
    /// Records that were labeled, embedded, and queued.
    Processed,
    /// Records confirmed written by a bulk insert.
    Inserted,
    /// Records that failed processing or insertion.
    Failed,
    /// Successful bulk insert calls.
    Batches,
}

/// Identifier lists tracked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdList {
    /// Identifiers skipped as already stored.
    SkippedDuplicates,
    /// Identifiers written by successful flushes.
    InsertedIds,
    /// Identifiers that failed at any stage.
    FailedIds,
}

/// Point-in-time copy of the run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// RFC3339 timestamp taken when the run started.
    pub start_time: Option<String>,
    /// RFC3339 timestamp taken when the run finished.
    pub end_time: Option<String>,
    /// Raw records handed to the pipeline.
    pub crawled: u64,
    /// Records skipped as already stored.
    pub duplicates: u64,
    /// Records labeled, embedded, and queued for insertion.
    pub processed: u64,
    /// Records written to the vector store.
    pub inserted: u64,
    /// Records that failed processing or insertion.
    pub failed: u64,
    /// Successful bulk insert calls.
    pub batches: u64,
    /// Identifiers skipped as already stored.
    pub skipped_duplicates: Vec<String>,
    /// Identifiers written to the vector store.
    pub inserted_ids: Vec<String>,
    /// Identifiers that failed at any stage.
    pub failed_ids: Vec<String>,
    /// Wall-clock duration of the run.
    pub total_time_seconds: f64,
}

impl PipelineStats {
    /// Share of `candidates` that ended up inserted, as a percentage.
    pub fn success_rate(&self, candidates: u64) -> f64 {
        self.inserted as f64 / candidates.max(1) as f64 * 100.0
    }

    /// Inserted records per second, or `None` before any time has elapsed.
    pub fn insert_rate(&self) -> Option<f64> {
        (self.total_time_seconds > 0.0).then(|| self.inserted as f64 / self.total_time_seconds)
    }

    fn counter_mut(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Crawled => &mut self.crawled,
            Counter::Duplicates => &mut self.duplicates,
            Counter::Processed => &mut self.processed,
            Counter::Inserted => &mut self.inserted,
            Counter::Failed => &mut self.failed,
            Counter::Batches => &mut self.batches,
        }
    }

    fn list_mut(&mut self, list: IdList) -> &mut Vec<String> {
        match list {
            IdList::SkippedDuplicates => &mut self.skipped_duplicates,
            IdList::InsertedIds => &mut self.inserted_ids,
            IdList::FailedIds => &mut self.failed_ids,
        }
    }
}

/// Thread-safe owner of the run statistics.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<PipelineStats>,
}

impl StatsAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to a counter.
    pub fn increment(&self, counter: Counter, delta: u64) {
        *self.lock().counter_mut(counter) += delta;
    }

    /// Append one identifier to a list.
    pub fn append(&self, list: IdList, value: impl Into<String>) {
        self.lock().list_mut(list).push(value.into());
    }

    /// Append several identifiers to a list in one critical section.
    pub fn extend<I>(&self, list: IdList, values: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.lock().list_mut(list).extend(values);
    }

    /// Count a single failed record and remember its identifier.
    pub fn record_failure(&self, id: impl Into<String>) {
        let mut stats = self.lock();
        stats.failed += 1;
        stats.failed_ids.push(id.into());
    }

    /// Account for a successful flush of `ids`.
    pub fn record_batch(&self, ids: Vec<String>) {
        let mut stats = self.lock();
        stats.inserted += ids.len() as u64;
        stats.batches += 1;
        stats.inserted_ids.extend(ids);
    }

    /// Account for a failed flush: every identifier in the batch is counted as failed.
    pub fn record_batch_failure(&self, ids: Vec<String>) {
        let mut stats = self.lock();
        stats.failed += ids.len() as u64;
        stats.failed_ids.extend(ids);
    }

    /// Clear all counters and stamp the start time.
    pub fn reset(&self) {
        *self.lock() = PipelineStats {
            start_time: Some(current_timestamp_rfc3339()),
            ..PipelineStats::default()
        };
    }

    /// Stamp the end time and elapsed duration, returning the final snapshot.
    pub fn finish(&self, elapsed_seconds: f64) -> PipelineStats {
        let mut stats = self.lock();
        stats.end_time = Some(current_timestamp_rfc3339());
        stats.total_time_seconds = (elapsed_seconds * 100.0).round() / 100.0;
        stats.clone()
    }

    /// Return a copy of the current statistics.
    pub fn snapshot(&self) -> PipelineStats {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current timestamp formatted as RFC3339.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
