//! Per-record enrichment: image, labels, description, embeddings.

use super::{
    ImageCache, ImageOptimizer, InsertionSender, ProcessingError, RawRecord, VectorRecord,
    description::render_description,
};
use crate::{
    backup::{BackupStore, BackupSummary},
    embedding::Embedder,
    labeling::{Labeler, parse_label_response},
    stats::{Counter, StatsAggregator},
};
use std::sync::Arc;

/// Turns a [`RawRecord`] into a [`VectorRecord`] and hands it to the insertion queue.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct RecordProcessor {
    cache: Arc<ImageCache>,
    optimizer: ImageOptimizer,
    labeler: Arc<dyn Labeler>,
    embedder: Arc<dyn Embedder>,
    backup: Arc<dyn BackupStore>,
    queue: InsertionSender,
    stats: Arc<StatsAggregator>,
}

impl RecordProcessor {
    /// Assemble a processor over shared collaborators.
    pub fn new(
        cache: Arc<ImageCache>,
        optimizer: ImageOptimizer,
        labeler: Arc<dyn Labeler>,
        embedder: Arc<dyn Embedder>,
        backup: Arc<dyn BackupStore>,
        queue: InsertionSender,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            cache,
            optimizer,
            labeler,
            embedder,
            backup,
            queue,
            stats,
        }
    }

    /// Download, label, describe, and embed `raw`, then write its backup summary.
    ///
    /// Touches neither the queue nor the statistics, so an abandoned call has no visible effect
    /// beyond the backup write.
    pub async fn prepare(&self, mut raw: RawRecord) -> Result<VectorRecord, ProcessingError> {
        raw.ensure_identifier();
        if !raw.has_image() {
            return Err(ProcessingError::MissingImage { product_id: raw.id });
        }

        let original = self.cache.get_or_fetch(&raw.image).await?;
        let optimized = self.optimizer.optimize_or_original(original).await;

        let content = self
            .labeler
            .label(&optimized)
            .await
            .map_err(|err| ProcessingError::LabelParseFailed(err.to_string()))?;
        let labels = parse_label_response(&content)
            .map_err(|err| ProcessingError::LabelParseFailed(err.to_string()))?;

        let description = render_description(&labels);
        let vectors = self.embedder.embed(&description, &raw.image).await?;
        vectors.validate(self.embedder.dimension())?;

        let record = VectorRecord {
            metadata: labels.to_metadata(&raw.image),
            id: raw.id,
            image_vector: vectors.image,
            description_vector: vectors.description,
            description,
            image: raw.image,
            date: raw.date,
            platform: raw.platform,
            store_name: raw.store_name,
            likes: raw.likes,
            comments: raw.comments,
            shares: raw.shares,
            link: raw.link,
        };

        if let Err(err) = self
            .backup
            .upsert(&BackupSummary::from_record(&record))
            .await
        {
            tracing::warn!(product_id = %record.id, error = %err, "Backup write failed");
        }

        Ok(record)
    }

    /// Enqueue a prepared record and count it as processed.
    pub fn commit(&self, record: VectorRecord) -> Result<String, ProcessingError> {
        let id = record.id.clone();
        self.queue.push(record)?;
        self.stats.increment(Counter::Processed, 1);
        tracing::debug!(product_id = %id, "Record queued for insertion");
        Ok(id)
    }

    /// Run [`Self::prepare`] and [`Self::commit`], counting a failure against the record.
    ///
    /// Returns the identifier of the queued record.
    pub async fn process(&self, mut raw: RawRecord) -> Result<String, ProcessingError> {
        raw.ensure_identifier();
        let id = raw.id.clone();
        let outcome = match self.prepare(raw).await {
            Ok(record) => self.commit(record),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            self.record_failure(&id, err);
        }
        outcome
    }

    /// Count `id` as failed.
    pub fn record_failure(&self, id: &str, error: &ProcessingError) {
        tracing::warn!(product_id = %id, error = %error, "Record failed");
        self.stats.record_failure(id);
    }
}
