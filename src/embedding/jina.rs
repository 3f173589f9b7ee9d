//! Client for Jina-compatible multimodal embedding endpoints.

use super::{Embedder, EmbeddingError, EmbeddingPair};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embeds description text and image URL in a single request.
pub struct JinaEmbedder {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) dimension: usize,
}

impl JinaEmbedder {
    /// Build a client for `endpoint` returning vectors of `dimension`.
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        model: &str,
        dimension: usize,
    ) -> Result<Self, EmbeddingError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(EmbeddingError::GenerationFailed(format!(
                "embedding endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let client = Client::builder()
            .user_agent("product-ingest/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            dimension,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    task: &'static str,
    dimensions: usize,
    input: [EmbeddingInput<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum EmbeddingInput<'a> {
    Text(&'a str),
    Image(&'a str),
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for JinaEmbedder {
    async fn embed(&self, text: &str, image_ref: &str) -> Result<EmbeddingPair, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            task: "retrieval.passage",
            dimensions: self.dimension,
            input: [EmbeddingInput::Text(text), EmbeddingInput::Image(image_ref)],
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let EmbeddingResponse { mut data } = response.json().await?;
        data.sort_by_key(|item| item.index);
        let mut vectors = data.into_iter().map(|item| item.embedding);
        let (Some(description), Some(image)) = (vectors.next(), vectors.next()) else {
            return Err(EmbeddingError::GenerationFailed(
                "embedding endpoint returned fewer than two vectors".to_string(),
            ));
        };

        let pair = EmbeddingPair { image, description };
        pair.validate(self.dimension)?;
        Ok(pair)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
