//! Shared byte cache for product images, keyed by source URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors raised while downloading an image.
#[derive(Debug, Error)]
pub enum ImageFetchError {
    /// Transport failure or timeout.
    #[error("image request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("image request to {url} returned {status}")]
    UnexpectedStatus {
        /// Status returned by the image host.
        status: StatusCode,
        /// Requested URL.
        url: String,
    },
    /// The server answered with an empty body.
    #[error("image at {url} is empty")]
    Empty {
        /// Requested URL.
        url: String,
    },
}

/// Downloads raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageFetchError>;
}

/// [`ImageFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    /// Build a fetcher with a 15 second request timeout.
    pub fn new() -> Result<Self, ImageFetchError> {
        let client = Client::builder()
            .user_agent("product-ingest/images")
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageFetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageFetchError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ImageFetchError::Empty {
                url: url.to_string(),
            });
        }
        Ok(bytes.to_vec())
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<Vec<u8>>>,
    order: VecDeque<String>,
}

/// Thread-safe image cache shared by every worker.
///
/// The lock is never held across a download, so two workers may fetch the same URL
/// concurrently; the last one to finish wins. Without `max_entries` the cache grows for the
/// whole run. With it, the oldest inserted entry is evicted first.
pub struct ImageCache {
    fetcher: Arc<dyn ImageFetcher>,
    state: Mutex<CacheState>,
    max_entries: Option<usize>,
}

impl ImageCache {
    /// Create an empty cache over `fetcher`.
    pub fn new(fetcher: Arc<dyn ImageFetcher>, max_entries: Option<usize>) -> Self {
        Self {
            fetcher,
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.filter(|max| *max > 0),
        }
    }

    /// Return cached bytes for `url`, downloading them on a miss.
    ///
    /// Nothing is cached when the download fails.
    pub async fn get_or_fetch(&self, url: &str) -> Result<Arc<Vec<u8>>, ImageFetchError> {
        if let Some(bytes) = self.cached(url) {
            tracing::trace!(url, "Image cache hit");
            return Ok(bytes);
        }

        let bytes = Arc::new(self.fetcher.fetch(url).await?);
        tracing::debug!(url, bytes = bytes.len(), "Image downloaded");
        self.store(url, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no images.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached image.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    fn cached(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        self.lock().entries.get(url).cloned()
    }

    fn store(&self, url: &str, bytes: Arc<Vec<u8>>) {
        let mut state = self.lock();
        if state.entries.insert(url.to_string(), bytes).is_none() {
            state.order.push_back(url.to_string());
        }
        if let Some(max) = self.max_entries {
            while state.entries.len() > max {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
