//! Run orchestration: duplicate filtering, the worker pool, and the insertion worker.

use super::{
    DuplicateFilter, FilteredRecords, HttpImageFetcher, ImageCache, ImageFetcher, ImageOptimizer,
    InsertionSender, InsertionSummary, InsertionWorker, PipelineError, PipelineSettings,
    ProcessingError, RawRecord, RecordProcessor, WorkerPool, insertion_queue,
};
use crate::{
    backup::{BackupStore, JsonlBackupStore, NoopBackupStore},
    config::Config,
    embedding::{Embedder, build_embedder},
    labeling::{Labeler, OllamaLabeler},
    qdrant::QdrantService,
    stats::{Counter, IdList, PipelineStats, StatsAggregator},
    vector_store::VectorStore,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{Instrument, Span};
use uuid::Uuid;

const SAMPLE_IDS: usize = 3;

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Destination of processed records.
    pub store: Arc<dyn VectorStore>,
    /// Image downloader behind the cache.
    pub fetcher: Arc<dyn ImageFetcher>,
    /// Vision model producing label JSON.
    pub labeler: Arc<dyn Labeler>,
    /// Producer of image and description vectors.
    pub embedder: Arc<dyn Embedder>,
    /// Best-effort secondary store.
    pub backup: Arc<dyn BackupStore>,
}

impl Collaborators {
    /// Build production collaborators and make sure the Qdrant collection exists.
    ///
    /// Any failure here happens before a record is touched and aborts the run.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let qdrant =
            QdrantService::from_config(config).map_err(|err| PipelineError::Startup(err.into()))?;
        qdrant
            .ensure_collection(config.embedding_dimension as u64)
            .await
            .map_err(|err| PipelineError::Startup(err.into()))?;
        tracing::info!(collection = %qdrant.collection(), "Vector store ready");

        let fetcher = HttpImageFetcher::new().map_err(|err| collaborator("image fetcher", err))?;
        let labeler = OllamaLabeler::new(&config.ollama_url, &config.labeler_model)
            .map_err(|err| collaborator("labeler", err))?;
        let embedder = build_embedder(config).map_err(|err| collaborator("embedder", err))?;
        let backup: Arc<dyn BackupStore> = match &config.backup_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Backup summaries enabled");
                Arc::new(JsonlBackupStore::new(path))
            }
            None => Arc::new(NoopBackupStore),
        };

        Ok(Self {
            store: Arc::new(qdrant),
            fetcher: Arc::new(fetcher),
            labeler: Arc::new(labeler),
            embedder,
            backup,
        })
    }
}

fn collaborator(component: &'static str, err: impl ToString) -> PipelineError {
    PipelineError::Collaborator {
        component,
        reason: err.to_string(),
    }
}

/// Streaming ingestion pipeline.
///
/// Each call to [`Self::run`] or [`Self::process_single`] creates its own insertion queue and
/// insertion worker; the image cache and the statistics live as long as the pipeline. Every run
/// logs inside an `ingest_run` span carrying a fresh `run_id`.
pub struct IngestionPipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    cache: Arc<ImageCache>,
    stats: Arc<StatsAggregator>,
}

impl IngestionPipeline {
    /// Assemble a pipeline over `collaborators`.
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let cache = Arc::new(ImageCache::new(
            Arc::clone(&collaborators.fetcher),
            settings.image_cache_max_entries,
        ));
        Self {
            collaborators,
            settings,
            cache,
            stats: Arc::new(StatsAggregator::new()),
        }
    }

    /// Shared handle to the live statistics.
    pub fn stats_handle(&self) -> Arc<StatsAggregator> {
        Arc::clone(&self.stats)
    }

    /// Image cache shared by every run of this pipeline.
    pub fn image_cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Settings this pipeline was built with.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Ingest `records`: skip stored ones, process the rest, and wait for the final flush.
    pub async fn run(&self, records: Vec<RawRecord>) -> PipelineStats {
        let span = run_span("batch");
        self.run_records(records).instrument(span).await
    }

    /// Process one record without a duplicate check and wait until it has been flushed.
    ///
    /// Returns the run statistics; `inserted` is 1 when the record reached the store.
    pub async fn process_single(
        &self,
        record: RawRecord,
    ) -> Result<PipelineStats, ProcessingError> {
        let span = run_span("single");
        self.run_single(record).instrument(span).await
    }

    async fn run_records(&self, records: Vec<RawRecord>) -> PipelineStats {
        let started = Instant::now();
        self.stats.reset();
        self.stats.increment(Counter::Crawled, records.len() as u64);
        tracing::info!(records = records.len(), "Streaming pipeline started");

        if records.is_empty() {
            tracing::info!("No records to process");
            return self.finish(started, 0);
        }

        let filter = DuplicateFilter::new(
            Arc::clone(&self.collaborators.store),
            self.settings.duplicate_check_batch_size,
        );
        let FilteredRecords { new, skipped } = filter.filter_records(records).await;
        self.stats.increment(Counter::Duplicates, skipped.len() as u64);
        self.stats.extend(IdList::SkippedDuplicates, skipped);

        if new.is_empty() {
            tracing::info!("Every record is already stored; nothing to do");
            return self.finish(started, 0);
        }

        let candidates = new.len();
        let (sender, worker) = self.start_insertion_worker();
        let monitor = ProgressMonitor::spawn(
            Arc::clone(&self.stats),
            candidates,
            self.settings.progress_interval,
        );

        let pool = WorkerPool::new(
            self.processor(sender.clone()),
            self.settings.max_workers,
            self.settings.task_timeout,
        );
        let summary = pool.run(new).await;
        drop(pool);
        monitor.stop().await;
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Processing complete; waiting for final flush"
        );

        self.stop_insertion_worker(sender, worker).await;
        let stats = self.finish(started, candidates);

        tracing::info!(cached_images = self.cache.len(), "Clearing image cache");
        self.cache.clear();
        stats
    }

    async fn run_single(&self, record: RawRecord) -> Result<PipelineStats, ProcessingError> {
        let started = Instant::now();
        self.stats.reset();
        self.stats.increment(Counter::Crawled, 1);

        let (sender, worker) = self.start_insertion_worker();
        let processor = self.processor(sender.clone());
        let pool = WorkerPool::new(processor, 1, self.settings.task_timeout);
        let outcome = pool.process_one(record).await;
        drop(pool);

        self.stop_insertion_worker(sender, worker).await;
        let stats = self.finish(started, 1);
        outcome.map(|_| stats)
    }

    fn processor(&self, queue: InsertionSender) -> RecordProcessor {
        RecordProcessor::new(
            Arc::clone(&self.cache),
            ImageOptimizer::new(
                self.settings.image_max_dimension,
                self.settings.image_jpeg_quality,
            ),
            Arc::clone(&self.collaborators.labeler),
            Arc::clone(&self.collaborators.embedder),
            Arc::clone(&self.collaborators.backup),
            queue,
            Arc::clone(&self.stats),
        )
    }

    fn start_insertion_worker(&self) -> (InsertionSender, JoinHandle<InsertionSummary>) {
        let (sender, receiver) = insertion_queue();
        let worker = InsertionWorker::new(
            receiver,
            Arc::clone(&self.collaborators.store),
            Arc::clone(&self.stats),
            self.settings.insert_batch_size,
            self.settings.insert_idle_timeout,
        )
        .spawn();
        (sender, worker)
    }

    /// Send the single shutdown message and wait, bounded, for the final flush.
    ///
    /// A worker that misses the deadline is aborted and awaited, so it can no longer write to
    /// the statistics once this returns.
    async fn stop_insertion_worker(
        &self,
        sender: InsertionSender,
        mut worker: JoinHandle<InsertionSummary>,
    ) {
        if !sender.shutdown() {
            tracing::warn!("Insertion worker stopped before shutdown was requested");
        }

        match timeout(self.settings.shutdown_timeout, &mut worker).await {
            Ok(Ok(summary)) => {
                tracing::debug!(
                    flushes = summary.flushes,
                    state = ?summary.state,
                    "Insertion worker joined"
                );
            }
            Ok(Err(join_error)) => {
                tracing::error!(error = %join_error, "Insertion worker ended abnormally");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.shutdown_timeout.as_secs(),
                    "Insertion worker did not stop in time; aborting it"
                );
                worker.abort();
                if let Ok(summary) = worker.await {
                    tracing::debug!(flushes = summary.flushes, "Insertion worker finished late");
                }
            }
        }
    }

    fn finish(&self, started: Instant, candidates: usize) -> PipelineStats {
        let stats = self.stats.finish(started.elapsed().as_secs_f64());
        let sample: Vec<&str> = stats
            .inserted_ids
            .iter()
            .take(SAMPLE_IDS)
            .map(String::as_str)
            .collect();

        tracing::info!(
            crawled = stats.crawled,
            duplicates = stats.duplicates,
            processed = stats.processed,
            inserted = stats.inserted,
            failed = stats.failed,
            batches = stats.batches,
            success_rate = %format!("{:.1}%", stats.success_rate(candidates as u64)),
            insert_rate = %stats
                .insert_rate()
                .map(|rate| format!("{rate:.2} records/s"))
                .unwrap_or_else(|| "n/a".to_string()),
            total_time_seconds = stats.total_time_seconds,
            sample_inserted = ?sample,
            "Streaming pipeline finished"
        );
        if !stats.failed_ids.is_empty() {
            let failed_sample: Vec<&str> = stats
                .failed_ids
                .iter()
                .take(SAMPLE_IDS)
                .map(String::as_str)
                .collect();
            tracing::warn!(failed = stats.failed, sample = ?failed_sample, "Some records failed");
        }
        stats
    }
}

fn run_span(mode: &'static str) -> Span {
    tracing::info_span!("ingest_run", mode, run_id = %Uuid::new_v4().simple())
}

/// Background task logging progress until stopped.
struct ProgressMonitor {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressMonitor {
    fn spawn(stats: Arc<StatsAggregator>, total: usize, every: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let every = every.max(Duration::from_millis(100));
        let task = async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        tracing::info!(
                            processed = snapshot.processed,
                            total,
                            inserted = snapshot.inserted,
                            failed = snapshot.failed,
                            "Progress: {}/{} processed",
                            snapshot.processed,
                            total
                        );
                    }
                }
            }
        };
        let handle = tokio::spawn(task.in_current_span());
        Self { stop, handle }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
