//! Partitioning of candidate identifiers into new and already stored.

use super::{PipelineError, RawRecord};
use crate::vector_store::VectorStore;
use std::{collections::HashSet, sync::Arc};

/// Result of [`DuplicateFilter::partition`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Identifiers the store does not hold (or could not confirm), in input order.
    pub new: Vec<String>,
    /// Identifiers the store already holds, in input order.
    pub existing: Vec<String>,
}

/// Result of [`DuplicateFilter::filter_records`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilteredRecords {
    /// Records that still need processing.
    pub new: Vec<RawRecord>,
    /// Identifiers skipped because they are already stored.
    pub skipped: Vec<String>,
}

/// Queries the vector store in bounded chunks to find identifiers it already holds.
///
/// A chunk whose query fails is treated as entirely new: the run proceeds and the store's
/// upsert semantics absorb any resulting re-insert.
pub struct DuplicateFilter {
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl DuplicateFilter {
    /// Build a filter issuing at most `batch_size` ids per existence query.
    pub fn new(store: Arc<dyn VectorStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Split `ids` into new and existing. The two sides are disjoint and together cover `ids`.
    pub async fn partition(&self, ids: &[String]) -> Partition {
        let mut present: HashSet<String> = HashSet::new();
        let chunks = ids.len().div_ceil(self.batch_size);

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            match self.store.exists_batch(chunk).await {
                Ok(found) => {
                    tracing::debug!(
                        chunk = index + 1,
                        chunks,
                        checked = chunk.len(),
                        existing = found.len(),
                        "Duplicate check chunk complete"
                    );
                    present.extend(found.into_iter().filter(|id| chunk.contains(id)));
                }
                Err(source) => {
                    let error = PipelineError::DuplicateQueryFailed {
                        count: chunk.len(),
                        source,
                    };
                    tracing::warn!(
                        chunk = index + 1,
                        chunks,
                        error = %error,
                        "Duplicate check failed; treating chunk as new"
                    );
                }
            }
        }

        let (existing, new): (Vec<String>, Vec<String>) =
            ids.iter().cloned().partition(|id| present.contains(id));
        Partition { new, existing }
    }

    /// Drop records whose identifier is already stored. Records without an identifier are kept.
    pub async fn filter_records(&self, records: Vec<RawRecord>) -> FilteredRecords {
        let ids: Vec<String> = records
            .iter()
            .map(|record| record.id.clone())
            .filter(|id| !id.trim().is_empty())
            .collect();
        let Partition { new, existing } = self.partition(&ids).await;

        let existing_set: HashSet<&String> = existing.iter().collect();
        let kept = records
            .into_iter()
            .filter(|record| !existing_set.contains(&record.id))
            .collect();

        tracing::info!(
            checked = ids.len(),
            new = new.len(),
            existing = existing.len(),
            "Duplicate filtering complete"
        );

        FilteredRecords {
            new: kept,
            skipped: existing,
        }
    }
}
