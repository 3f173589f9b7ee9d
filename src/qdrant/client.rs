//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::pipeline::VectorRecord;
use crate::qdrant::{
    payload::{build_point, point_id_for},
    types::{DESCRIPTION_VECTOR, IMAGE_VECTOR, QdrantError, RetrieveResponse},
};
use crate::stats::current_timestamp_rfc3339;
use crate::vector_store::{VectorStore, VectorStoreError};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

/// Lightweight HTTP client for Qdrant operations on the product collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantService {
    /// Construct a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, QdrantError> {
        Self::new(
            &config.qdrant_url,
            &config.qdrant_collection_name,
            config.qdrant_api_key.clone(),
        )
    }

    /// Construct a client for `collection` on the Qdrant instance at `url`.
    pub fn new(url: &str, collection: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("product-ingest/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
        })
    }

    /// Name of the collection this client writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the product collection and its payload index when missing.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        if !self.collection_exists().await? {
            tracing::info!(
                collection = %self.collection,
                vector_size,
                "Creating product collection"
            );
            self.create_collection(vector_size).await?;
        }
        self.ensure_payload_index().await
    }

    /// Create or update the collection with two named vectors of `vector_size`.
    pub async fn create_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                IMAGE_VECTOR: { "size": vector_size, "distance": "Cosine" },
                DESCRIPTION_VECTOR: { "size": vector_size, "distance": "Cosine" },
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection ensured/created");
        })
        .await
    }

    /// Return the product ids among `product_ids` that already have a point.
    pub async fn retrieve_existing(
        &self,
        product_ids: &[String],
    ) -> Result<HashSet<String>, QdrantError> {
        if product_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let by_point_id: HashMap<String, &String> = product_ids
            .iter()
            .map(|product_id| (point_id_for(product_id), product_id))
            .collect();
        let point_ids: Vec<&String> = by_point_id.keys().collect();

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points", self.collection),
            )?
            .json(&json!({
                "ids": point_ids,
                "with_payload": ["product_id"],
                "with_vector": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Point lookup failed");
            return Err(error);
        }

        let RetrieveResponse { result } = response.json().await?;
        let existing = result
            .into_iter()
            .filter_map(|point| {
                let from_payload = point
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("product_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                from_payload.or_else(|| {
                    by_point_id
                        .get(&stringify_point_id(point.id))
                        .map(|product_id| (*product_id).clone())
                })
            })
            .collect();

        Ok(existing)
    }

    /// Upsert `records` in one request, waiting for Qdrant to apply them.
    pub async fn upsert_records(&self, records: &[VectorRecord]) -> Result<(), QdrantError> {
        if records.is_empty() {
            return Ok(());
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = records
            .iter()
            .map(|record| build_point(record, &now))
            .collect();
        let point_count = points.len();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                points = point_count,
                "Points upserted"
            );
        })
        .await
    }

    async fn ensure_payload_index(&self) -> Result<(), QdrantError> {
        let body = json!({
            "field_name": "product_id",
            "field_schema": "keyword",
        });

        let endpoint = format!("collections/{}/index", self.collection);
        let response = self
            .request(Method::PUT, &endpoint)?
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::debug!(collection = %self.collection, "Payload index ensured");
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::warn!(
                collection = %self.collection,
                error = %error,
                "Failed to ensure payload index"
            );
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(
                    collection = %self.collection,
                    error = %error,
                    "Collection existence check failed"
                );
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    async fn exists_batch(&self, ids: &[String]) -> Result<HashSet<String>, VectorStoreError> {
        Ok(self.retrieve_existing(ids).await?)
    }

    async fn insert_batch(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError> {
        Ok(self.upsert_records(records).await?)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
