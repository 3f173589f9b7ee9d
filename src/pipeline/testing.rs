//! In-memory collaborators for pipeline unit tests.

use super::{ImageFetchError, ImageFetcher, RawRecord, VectorRecord};
use crate::{
    backup::{BackupError, BackupStore, BackupSummary},
    labeling::{Labeler, LabelerError},
    vector_store::{VectorStore, VectorStoreError},
};
use async_trait::async_trait;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub(crate) const DEFAULT_LABELS: &str = r#"```json
{
  "image_recipient": ["Dad"],
  "target_audience": ["Son", "Daughter"],
  "occasion": ["Father's Day"],
  "product_type": ["Mug"],
  "design_style": ["Vintage"],
  "color_aesthetic": ["Blue"],
  "trademark_level": "No TM",
  "main_subject": ["Fishing rod"],
  "text": ["Reel Cool Dad"]
}
```"#;

pub(crate) fn raw_record(id: &str) -> RawRecord {
    RawRecord {
        id: id.to_string(),
        image: format!("https://cdn.example.com/{id}.jpg"),
        date: "2024-05-01 10:00:00".into(),
        platform: "Website".into(),
        store_name: "Acme".into(),
        likes: 10,
        comments: 2,
        shares: 1,
        link: format!("https://shop.example.com/{id}"),
    }
}

pub(crate) fn vector_record(id: &str) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        image_vector: vec![0.5; 4],
        description_vector: vec![0.5; 4],
        description: format!("description of {id}"),
        metadata: json!({}),
        image: format!("https://cdn.example.com/{id}.jpg"),
        date: "2024-05-01".into(),
        platform: "Website".into(),
        store_name: "Acme".into(),
        likes: 0,
        comments: 0,
        shares: 0,
        link: String::new(),
    }
}

fn owned_set<I, S>(values: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

/// Vector store keeping everything in memory.
#[derive(Default)]
pub(crate) struct FakeStore {
    existing: Mutex<HashSet<String>>,
    fail_exists_for: HashSet<String>,
    fail_insert_for: HashSet<String>,
    exists_calls: Mutex<Vec<usize>>,
    inserted: Mutex<Vec<Vec<String>>>,
    first_insert_delay: Mutex<Option<Duration>>,
}

impl FakeStore {
    pub(crate) fn with_existing<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            existing: Mutex::new(owned_set(ids)),
            ..Self::default()
        }
    }

    /// Existence queries containing any of `ids` fail.
    pub(crate) fn failing_exists_for<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_exists_for = owned_set(ids);
        self
    }

    /// Bulk inserts containing any of `ids` fail.
    pub(crate) fn failing_insert_for<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_insert_for = owned_set(ids);
        self
    }

    /// The first bulk insert sleeps for `delay` before completing.
    pub(crate) fn delaying_first_insert(self, delay: Duration) -> Self {
        *self.first_insert_delay.lock().expect("lock") = Some(delay);
        self
    }

    pub(crate) fn exists_chunk_sizes(&self) -> Vec<usize> {
        self.exists_calls.lock().expect("lock").clone()
    }

    /// Sizes of the successful bulk inserts, in order.
    pub(crate) fn inserted_batch_sizes(&self) -> Vec<usize> {
        self.inserted
            .lock()
            .expect("lock")
            .iter()
            .map(Vec::len)
            .collect()
    }

    pub(crate) fn inserted_ids(&self) -> Vec<String> {
        self.inserted.lock().expect("lock").concat()
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn exists_batch(&self, ids: &[String]) -> Result<HashSet<String>, VectorStoreError> {
        self.exists_calls.lock().expect("lock").push(ids.len());
        if ids.iter().any(|id| self.fail_exists_for.contains(id)) {
            return Err(VectorStoreError::Rejected("existence query failed".into()));
        }
        let existing = self.existing.lock().expect("lock");
        Ok(ids
            .iter()
            .filter(|id| existing.contains(*id))
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError> {
        let delay = self.first_insert_delay.lock().expect("lock").take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if records
            .iter()
            .any(|record| self.fail_insert_for.contains(&record.id))
        {
            return Err(VectorStoreError::Rejected("bulk insert failed".into()));
        }
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        self.existing
            .lock()
            .expect("lock")
            .extend(ids.iter().cloned());
        self.inserted.lock().expect("lock").push(ids);
        Ok(())
    }
}

/// Image fetcher returning the URL's own bytes.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn failing_on<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: owned_set(urls),
            ..Self::default()
        }
    }

    pub(crate) fn slow_on<I, S>(mut self, urls: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slow.extend(urls.into_iter().map(|url| (url.into(), delay)));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.slow.get(url) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(url) {
            return Err(ImageFetchError::Empty {
                url: url.to_string(),
            });
        }
        Ok(url.as_bytes().to_vec())
    }
}

/// Labeler answering with a fixed response.
pub(crate) struct FakeLabeler {
    response: Option<String>,
    panic_marker: Option<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub(crate) peak_in_flight: AtomicUsize,
}

impl Default for FakeLabeler {
    fn default() -> Self {
        Self {
            response: Some(DEFAULT_LABELS.to_string()),
            panic_marker: None,
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeLabeler {
    pub(crate) fn responding(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            response: None,
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic when the image bytes contain `marker`.
    pub(crate) fn panicking_on(mut self, marker: &str) -> Self {
        self.panic_marker = Some(marker.to_string());
        self
    }
}

#[async_trait]
impl Labeler for FakeLabeler {
    async fn label(&self, image: &[u8]) -> Result<String, LabelerError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(marker) = &self.panic_marker
            && String::from_utf8_lossy(image).contains(marker.as_str())
        {
            panic!("labeler crashed on {marker}");
        }

        self.response
            .clone()
            .ok_or_else(|| LabelerError::Request("connection refused".into()))
    }
}

/// Backup store whose writes always fail.
pub(crate) struct FailingBackup;

#[async_trait]
impl BackupStore for FailingBackup {
    async fn upsert(&self, _summary: &BackupSummary) -> Result<(), BackupError> {
        Err(BackupError::Io(std::io::Error::other("disk full")))
    }
}
