//! Contract between the pipeline and the vector database.

use crate::{pipeline::VectorRecord, qdrant::QdrantError};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Errors surfaced by a [`VectorStore`] implementation.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Transport or protocol failure talking to Qdrant.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// The store refused the request for a reason of its own.
    #[error("vector store rejected request: {0}")]
    Rejected(String),
}

/// Storage backend for processed product records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return the subset of `ids` already present in the store.
    async fn exists_batch(&self, ids: &[String]) -> Result<HashSet<String>, VectorStoreError>;

    /// Write `records` in a single all-or-nothing call.
    async fn insert_batch(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError>;
}
