//! Bounded-concurrency execution of the record processor.

use super::{ProcessingError, RawRecord, RecordProcessor};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};
use tracing::Instrument;

/// Outcome counts for one [`WorkerPool::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    /// Records handed to the pool.
    pub total: usize,
    /// Records prepared and queued for insertion.
    pub succeeded: usize,
    /// Records that failed for any reason, timeouts included.
    pub failed: usize,
    /// Records abandoned after exceeding the task timeout.
    pub timed_out: usize,
}

/// Runs [`RecordProcessor`] over many records with at most `max_workers` in flight.
///
/// Each record's work runs on its own task. When it exceeds `task_timeout` the pool stops
/// waiting for it, counts a [`ProcessingError::Timeout`], and frees the slot; the detached task
/// keeps running until it finishes on its own and its result is discarded. A panic inside the
/// work is counted as a failure for that record only.
pub struct WorkerPool {
    processor: RecordProcessor,
    max_workers: usize,
    task_timeout: Duration,
}

impl WorkerPool {
    /// Build a pool around `processor`.
    pub fn new(processor: RecordProcessor, max_workers: usize, task_timeout: Duration) -> Self {
        Self {
            processor,
            max_workers: max_workers.max(1),
            task_timeout,
        }
    }

    /// Process a single record under the same timeout and failure accounting as [`Self::run`].
    ///
    /// Returns the identifier of the queued record.
    pub async fn process_one(&self, raw: RawRecord) -> Result<String, ProcessingError> {
        execute(self.processor.clone(), raw, self.task_timeout).await.1
    }

    /// Process every record and return once each one has reached a terminal state.
    pub async fn run(&self, records: Vec<RawRecord>) -> PoolSummary {
        let total = records.len();
        let mut summary = PoolSummary {
            total,
            ..PoolSummary::default()
        };
        if total == 0 {
            return summary;
        }

        tracing::info!(
            records = total,
            max_workers = self.max_workers,
            task_timeout_secs = self.task_timeout.as_secs(),
            "Worker pool starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for raw in records {
            let processor = self.processor.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_timeout = self.task_timeout;

            tasks.spawn(
                async move {
                    // The semaphore is never closed, so a permit is always granted.
                    let _permit = semaphore.acquire_owned().await.ok();
                    execute(processor, raw, task_timeout).await
                }
                .in_current_span(),
            );
        }

        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok((id, Ok(_))) => {
                    summary.succeeded += 1;
                    tracing::info!(product_id = %id, "[{completed}/{total}] Record processed");
                }
                Ok((id, Err(err))) => {
                    summary.failed += 1;
                    if matches!(err, ProcessingError::Timeout { .. }) {
                        summary.timed_out += 1;
                    }
                    tracing::info!(
                        product_id = %id,
                        error = %err,
                        "[{completed}/{total}] Record failed"
                    );
                }
                Err(join_error) => {
                    summary.failed += 1;
                    tracing::error!(
                        error = %join_error,
                        "[{completed}/{total}] Worker task ended abnormally"
                    );
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Worker pool finished"
        );
        summary
    }
}

/// Run one record to a terminal state, counting a failure against it.
async fn execute(
    processor: RecordProcessor,
    mut raw: RawRecord,
    task_timeout: Duration,
) -> (String, Result<String, ProcessingError>) {
    raw.ensure_identifier();
    let id = raw.id.clone();
    let outcome = prepare_and_commit(&processor, raw, task_timeout).await;
    if let Err(err) = &outcome {
        processor.record_failure(&id, err);
    }
    (id, outcome)
}

/// Prepare `raw` on a detached task bounded by `task_timeout`, then commit it.
///
/// Only this function commits, so a result arriving after the timeout is never queued.
async fn prepare_and_commit(
    processor: &RecordProcessor,
    raw: RawRecord,
    task_timeout: Duration,
) -> Result<String, ProcessingError> {
    let work = tokio::spawn({
        let processor = processor.clone();
        async move { processor.prepare(raw).await }.in_current_span()
    });

    match timeout(task_timeout, work).await {
        Ok(Ok(Ok(record))) => processor.commit(record),
        Ok(Ok(Err(err))) => Err(err),
        Ok(Err(join_error)) => Err(ProcessingError::Aborted(join_error.to_string())),
        Err(_) => Err(ProcessingError::Timeout {
            seconds: task_timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backup::NoopBackupStore,
        embedding::HashingEmbedder,
        pipeline::{
            ImageCache, ImageOptimizer, InsertionReceiver,
            insertion::{QueueMessage, insertion_queue},
            testing::{FakeFetcher, FakeLabeler, raw_record},
        },
        stats::StatsAggregator,
    };
    use std::sync::atomic::Ordering;

    struct Harness {
        pool: WorkerPool,
        receiver: InsertionReceiver,
        stats: Arc<StatsAggregator>,
        labeler: Arc<FakeLabeler>,
    }

    fn harness(
        fetcher: FakeFetcher,
        labeler: FakeLabeler,
        max_workers: usize,
        task_timeout: Duration,
    ) -> Harness {
        let (sender, receiver) = insertion_queue();
        let stats = Arc::new(StatsAggregator::new());
        let labeler = Arc::new(labeler);
        let processor = RecordProcessor::new(
            Arc::new(ImageCache::new(Arc::new(fetcher), None)),
            ImageOptimizer::default(),
            labeler.clone(),
            Arc::new(HashingEmbedder::new(8)),
            Arc::new(NoopBackupStore),
            sender,
            Arc::clone(&stats),
        );
        Harness {
            pool: WorkerPool::new(processor, max_workers, task_timeout),
            receiver,
            stats,
            labeler,
        }
    }

    fn drain_ids(receiver: &mut InsertionReceiver) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(message) = receiver.try_recv() {
            if let QueueMessage::Record(record) = message {
                ids.push(record.id);
            }
        }
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn one_failing_record_does_not_affect_siblings() {
        let bad = "https://cdn.example.com/p-4.jpg";
        let mut harness = harness(
            FakeFetcher::failing_on([bad]),
            FakeLabeler::default(),
            4,
            Duration::from_secs(30),
        );
        let records: Vec<RawRecord> = (0..10).map(|i| raw_record(&format!("p-{i}"))).collect();

        let summary = harness.pool.run(records).await;

        assert_eq!(summary.total, 10);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);
        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.processed, 9);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.failed_ids, vec!["p-4"]);
        assert_eq!(drain_ids(&mut harness.receiver).len(), 9);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_max_workers() {
        let harness = harness(
            FakeFetcher::default(),
            FakeLabeler::default().with_delay(Duration::from_millis(20)),
            3,
            Duration::from_secs(30),
        );
        let records: Vec<RawRecord> = (0..12).map(|i| raw_record(&format!("p-{i}"))).collect();

        let summary = harness.pool.run(records).await;

        assert_eq!(summary.succeeded, 12);
        let peak = harness.labeler.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded the limit");
        assert!(peak >= 2, "work should overlap, peak was {peak}");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_record_is_abandoned_and_its_late_result_discarded() {
        let slow_image = "https://cdn.example.com/slow.jpg";
        let mut harness = harness(
            FakeFetcher::default().slow_on([slow_image], Duration::from_secs(60)),
            FakeLabeler::default(),
            2,
            Duration::from_secs(5),
        );
        let records = vec![
            raw_record("fast-1"),
            raw_record("slow"),
            raw_record("fast-2"),
        ];

        let summary = harness.pool.run(records).await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.timed_out, 1);

        // Let the abandoned work finish; its record must not reach the queue.
        tokio::time::sleep(Duration::from_secs(120)).await;
        let snapshot = harness.stats.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed_ids, vec!["slow"]);
        assert_eq!(drain_ids(&mut harness.receiver), vec!["fast-1", "fast-2"]);
    }

    #[tokio::test]
    async fn panicking_record_is_counted_as_failed() {
        let harness = harness(
            FakeFetcher::default(),
            FakeLabeler::default().panicking_on("boom"),
            2,
            Duration::from_secs(30),
        );
        let records = vec![raw_record("ok"), raw_record("boom")];

        let summary = harness.pool.run(records).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(harness.stats.snapshot().failed_ids, vec!["boom"]);
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let harness = harness(
            FakeFetcher::default(),
            FakeLabeler::default(),
            2,
            Duration::from_secs(1),
        );
        assert_eq!(harness.pool.run(Vec::new()).await, PoolSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn process_one_reports_timeout() {
        let harness = harness(
            FakeFetcher::default()
                .slow_on(["https://cdn.example.com/p-1.jpg"], Duration::from_secs(30)),
            FakeLabeler::default(),
            1,
            Duration::from_secs(2),
        );

        let err = harness
            .pool
            .process_one(raw_record("p-1"))
            .await
            .expect_err("timeout");
        assert!(matches!(err, ProcessingError::Timeout { seconds: 2 }));
        assert_eq!(harness.stats.snapshot().failed_ids, vec!["p-1"]);
    }
}
