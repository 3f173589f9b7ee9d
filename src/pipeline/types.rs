//! Records flowing through the pipeline and the errors raised along the way.

use crate::{
    embedding::EmbeddingError, pipeline::image_cache::ImageFetchError, source::SourceError,
    vector_store::VectorStoreError,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Product row as delivered by a [`crate::source::RecordSource`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Product identifier; primary key in the vector store.
    #[serde(default, alias = "id_sanpham", alias = "product_id")]
    pub id: String,
    /// URL of the product image.
    #[serde(default)]
    pub image: String,
    /// Publication timestamp as provided by the source.
    #[serde(default)]
    pub date: String,
    /// Sales platform the product was published on.
    #[serde(default)]
    pub platform: String,
    /// Store that published the product.
    #[serde(default, alias = "name_store")]
    pub store_name: String,
    /// Like counter.
    #[serde(default, alias = "like", deserialize_with = "lenient_count")]
    pub likes: u64,
    /// Comment counter.
    #[serde(default, alias = "comment", deserialize_with = "lenient_count")]
    pub comments: u64,
    /// Share counter.
    #[serde(default, alias = "share", deserialize_with = "lenient_count")]
    pub shares: u64,
    /// Landing page of the product.
    #[serde(default, alias = "link_redirect")]
    pub link: String,
}

impl RawRecord {
    /// Fill in a generated `SP_xxxxxxxx` identifier when the source left it blank.
    pub fn ensure_identifier(&mut self) {
        if self.id.trim().is_empty() {
            let suffix = Uuid::new_v4().simple().to_string();
            self.id = format!("SP_{}", &suffix[..8]);
        }
    }

    /// Whether the record carries a usable image reference.
    pub fn has_image(&self) -> bool {
        !self.image.trim().is_empty()
    }
}

/// Counters arrive as numbers, numeric strings, or nulls depending on the export.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|value| value.max(0.0) as u64))
            .unwrap_or(0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_or(0, |value| value.max(0.0) as u64),
        _ => 0,
    })
}

/// Fully processed product ready for a bulk insert.
///
/// Deliberately not `Clone`: a record moves from the worker that built it, through the
/// insertion queue, into exactly one flush.
#[derive(Debug, PartialEq)]
pub struct VectorRecord {
    /// Product identifier.
    pub id: String,
    /// Embedding of the product image.
    pub image_vector: Vec<f32>,
    /// Embedding of the rendered description.
    pub description_vector: Vec<f32>,
    /// Rendered description text.
    pub description: String,
    /// Label attributes serialized as JSON.
    pub metadata: Value,
    /// Image URL.
    pub image: String,
    /// Publication timestamp.
    pub date: String,
    /// Sales platform.
    pub platform: String,
    /// Store name.
    pub store_name: String,
    /// Like counter.
    pub likes: u64,
    /// Comment counter.
    pub comments: u64,
    /// Share counter.
    pub shares: u64,
    /// Landing page.
    pub link: String,
}

/// Per-record failures. Each one is counted and isolated; the run continues.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The record has no image reference to label.
    #[error("record {product_id} has no image reference")]
    MissingImage {
        /// Identifier of the rejected record.
        product_id: String,
    },
    /// Downloading the image failed.
    #[error("failed to fetch image: {0}")]
    FetchFailed(#[from] ImageFetchError),
    /// The labeler produced no usable structured output.
    #[error("failed to obtain label attributes: {0}")]
    LabelParseFailed(String),
    /// The embedder failed or returned vectors of the wrong size.
    #[error("failed to generate embeddings: {0}")]
    EmbeddingFailed(#[from] EmbeddingError),
    /// The record exceeded its wall-clock budget and was abandoned.
    #[error("processing exceeded {seconds}s and was abandoned")]
    Timeout {
        /// Configured budget in seconds.
        seconds: u64,
    },
    /// The worker task ended without producing a result (panic or abort).
    #[error("worker task aborted: {0}")]
    Aborted(String),
    /// The insertion worker is gone, so the record cannot be handed off.
    #[error("insertion queue is closed")]
    QueueClosed,
}

/// Pipeline-level failures.
///
/// Only [`PipelineError::Startup`] and [`PipelineError::Source`] stop a run, and both happen
/// before any record is processed. The other variants describe recoverable conditions that are
/// logged and counted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The vector store could not be reached or prepared.
    #[error("vector store unavailable at startup: {0}")]
    Startup(#[source] VectorStoreError),
    /// The raw record list could not be loaded.
    #[error("failed to load raw records: {0}")]
    Source(#[from] SourceError),
    /// A collaborator could not be constructed.
    #[error("failed to initialize {component}: {reason}")]
    Collaborator {
        /// Name of the collaborator.
        component: &'static str,
        /// Underlying failure.
        reason: String,
    },
    /// A bulk insert failed; every record of the batch is counted as failed.
    #[error("bulk insert of {count} records failed: {source}")]
    BatchInsertFailed {
        /// Size of the dropped batch.
        count: usize,
        /// Store error.
        #[source]
        source: VectorStoreError,
    },
    /// An existence query failed; the chunk is treated as entirely new.
    #[error("duplicate check for {count} ids failed: {source}")]
    DuplicateQueryFailed {
        /// Size of the affected chunk.
        count: usize,
        /// Store error.
        #[source]
        source: VectorStoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_record_accepts_source_column_names() {
        let record: RawRecord = serde_json::from_value(json!({
            "id_sanpham": "12345",
            "image": "https://cdn.example.com/a.jpg",
            "date": "2024-05-01 10:00:00",
            "like": "42",
            "comment": 3,
            "share": null,
            "link_redirect": "https://shop.example.com/p/12345",
            "platform": "Website",
            "name_store": "Acme"
        }))
        .expect("record");

        assert_eq!(record.id, "12345");
        assert_eq!(record.likes, 42);
        assert_eq!(record.comments, 3);
        assert_eq!(record.shares, 0);
        assert_eq!(record.store_name, "Acme");
        assert_eq!(record.link, "https://shop.example.com/p/12345");
    }

    #[test]
    fn ensure_identifier_generates_prefixed_id() {
        let mut record = RawRecord::default();
        record.ensure_identifier();
        assert!(record.id.starts_with("SP_"));
        assert_eq!(record.id.len(), 11);

        let mut named = RawRecord {
            id: "keep".into(),
            ..RawRecord::default()
        };
        named.ensure_identifier();
        assert_eq!(named.id, "keep");
    }

    #[test]
    fn has_image_ignores_whitespace() {
        let record = RawRecord {
            image: "   ".into(),
            ..RawRecord::default()
        };
        assert!(!record.has_image());
    }
}
