//! Single-consumer batching of processed records into the vector store.
//!
//! Workers push [`VectorRecord`]s onto an unbounded queue. One [`InsertionWorker`] drains it,
//! flushing a bulk insert whenever the buffer reaches the batch size or the queue stays idle for
//! the configured timeout. A single shutdown message (or every sender being dropped) makes the
//! worker flush what is left and stop.

use super::{PipelineError, ProcessingError, VectorRecord};
use crate::{stats::StatsAggregator, vector_store::VectorStore};
use std::{mem, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::Instrument;

/// Item carried by the insertion queue.
#[derive(Debug)]
pub enum QueueMessage {
    /// A record ready to be inserted.
    Record(VectorRecord),
    /// No further records will arrive.
    Shutdown,
}

/// Create the insertion queue for one run.
pub fn insertion_queue() -> (InsertionSender, InsertionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InsertionSender { tx }, InsertionReceiver { rx })
}

/// Producer side of the insertion queue. Cloned into every worker.
#[derive(Debug, Clone)]
pub struct InsertionSender {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

impl InsertionSender {
    /// Enqueue a record. Never blocks; fails only once the consumer is gone.
    pub fn push(&self, record: VectorRecord) -> Result<(), ProcessingError> {
        self.tx
            .send(QueueMessage::Record(record))
            .map_err(|_| ProcessingError::QueueClosed)
    }

    /// Send the shutdown message. Consumes this handle so one owner sends it exactly once.
    ///
    /// Returns `false` when the consumer has already stopped.
    pub fn shutdown(self) -> bool {
        self.tx.send(QueueMessage::Shutdown).is_ok()
    }
}

/// Consumer side of the insertion queue.
#[derive(Debug)]
pub struct InsertionReceiver {
    rx: mpsc::UnboundedReceiver<QueueMessage>,
}

#[cfg(test)]
impl InsertionReceiver {
    pub(crate) fn try_recv(&mut self) -> Option<QueueMessage> {
        self.rx.try_recv().ok()
    }
}

/// Lifecycle of the [`InsertionWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for records and appending them to the buffer.
    Accumulating,
    /// Writing the buffer to the store.
    Flushing,
    /// Shutdown received; flushing the remainder.
    Draining,
    /// Terminal state.
    Stopped,
}

/// Outcome reported by a stopped [`InsertionWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionSummary {
    /// Bulk insert attempts, successful or not.
    pub flushes: usize,
    /// State the worker ended in.
    pub state: WorkerState,
}

/// Why a flush was triggered.
#[derive(Debug, Clone, Copy)]
enum FlushReason {
    BatchFull,
    Idle,
    Drain,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::BatchFull => "batch_full",
            Self::Idle => "idle",
            Self::Drain => "drain",
        }
    }
}

/// Sole consumer of the insertion queue and sole owner of the pending batch.
pub struct InsertionWorker {
    receiver: InsertionReceiver,
    store: Arc<dyn VectorStore>,
    stats: Arc<StatsAggregator>,
    batch_size: usize,
    idle_timeout: Duration,
    buffer: Vec<VectorRecord>,
    state: WorkerState,
    flushes: usize,
}

impl InsertionWorker {
    /// Build a worker draining `receiver` into `store` in batches of `batch_size`.
    pub fn new(
        receiver: InsertionReceiver,
        store: Arc<dyn VectorStore>,
        stats: Arc<StatsAggregator>,
        batch_size: usize,
        idle_timeout: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            receiver,
            store,
            stats,
            batch_size,
            idle_timeout,
            buffer: Vec::with_capacity(batch_size),
            state: WorkerState::Accumulating,
            flushes: 0,
        }
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> JoinHandle<InsertionSummary> {
        tokio::spawn(self.run().in_current_span())
    }

    /// Consume the queue until shutdown, then flush the remainder and stop.
    pub async fn run(mut self) -> InsertionSummary {
        tracing::info!(
            batch_size = self.batch_size,
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "Insertion worker started"
        );

        while self.state != WorkerState::Stopped {
            match timeout(self.idle_timeout, self.receiver.rx.recv()).await {
                Err(_) => {
                    if !self.buffer.is_empty() {
                        self.flush(FlushReason::Idle).await;
                    }
                }
                Ok(Some(QueueMessage::Record(record))) => {
                    self.buffer.push(record);
                    if self.buffer.len() >= self.batch_size {
                        self.flush(FlushReason::BatchFull).await;
                    }
                }
                Ok(Some(QueueMessage::Shutdown)) => self.drain("shutdown message").await,
                Ok(None) => self.drain("queue closed").await,
            }
        }

        tracing::info!(flushes = self.flushes, "Insertion worker stopped");
        InsertionSummary {
            flushes: self.flushes,
            state: self.state,
        }
    }

    async fn drain(&mut self, trigger: &'static str) {
        self.state = WorkerState::Draining;
        tracing::debug!(trigger, pending = self.buffer.len(), "Insertion worker draining");
        if !self.buffer.is_empty() {
            self.flush(FlushReason::Drain).await;
        }
        self.state = WorkerState::Stopped;
    }

    async fn flush(&mut self, reason: FlushReason) {
        let resume = self.state;
        self.state = WorkerState::Flushing;

        let batch = mem::take(&mut self.buffer);
        let ids: Vec<String> = batch.iter().map(|record| record.id.clone()).collect();
        self.flushes += 1;

        match self.store.insert_batch(&batch).await {
            Ok(()) => {
                tracing::info!(
                    batch = self.flushes,
                    records = ids.len(),
                    reason = reason.as_str(),
                    "Batch inserted"
                );
                self.stats.record_batch(ids);
            }
            Err(source) => {
                let error = PipelineError::BatchInsertFailed {
                    count: ids.len(),
                    source,
                };
                tracing::error!(
                    batch = self.flushes,
                    reason = reason.as_str(),
                    error = %error,
                    "Batch dropped"
                );
                self.stats.record_batch_failure(ids);
            }
        }

        self.buffer = Vec::with_capacity(self.batch_size);
        self.state = resume;
    }
}
