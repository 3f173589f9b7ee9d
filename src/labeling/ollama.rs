//! Vision labeler backed by an Ollama runtime.
//!
//! Requests go straight to `/api/generate` with the image attached as base64, the same way the
//! embedding adapters talk HTTP to their providers.

use super::{Labeler, LabelerError};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const LABEL_PROMPT: &str = r#"You are an expert product analyst. Study the product image and
describe what is PRINTED or DISPLAYED on the product (not the blank product itself), who it is
for, and how it is positioned in the market. Prefer specific niche terms over generic ones.

Return ONLY this JSON object, with every list holding short labels:
{
  "image_recipient": ["..."],
  "target_audience": ["..."],
  "usage_purpose": ["..."],
  "occasion": ["..."],
  "niche_theme": ["..."],
  "sentiment_tone": ["..."],
  "message_type": ["..."],
  "personalization_type": ["..."],
  "product_type": ["..."],
  "placement_display_context": ["..."],
  "design_style": ["..."],
  "color_aesthetic": ["..."],
  "trademark_level": "No TM | Slight TM | TM | TM resemblance",
  "main_subject": ["..."],
  "text": ["exact printed text"]
}"#;

/// Labels product images with a vision model served by Ollama.
pub struct OllamaLabeler {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaLabeler {
    /// Build a labeler for `model` served at `base_url`.
    pub fn new(base_url: &str, model: &str) -> Result<Self, LabelerError> {
        let http = Client::builder()
            .user_agent("product-ingest/labeler")
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| LabelerError::Request(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default = "default_done")]
    done: bool,
}

fn default_done() -> bool {
    true
}

#[async_trait]
impl Labeler for OllamaLabeler {
    async fn label(&self, image: &[u8]) -> Result<String, LabelerError> {
        let payload = json!({
            "model": self.model,
            "prompt": LABEL_PROMPT,
            "images": [STANDARD.encode(image)],
            "stream": false,
            "options": {
                "temperature": 0.0,
                "top_p": 0.9,
                "num_ctx": 4096,
                "num_predict": 1024,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LabelerError::Request(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LabelerError::Request(format!(
                "model {} not available at {}",
                self.model,
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LabelerError::Request(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            LabelerError::Request(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LabelerError::Request(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let content = body.response.trim();
        if content.is_empty() {
            return Err(LabelerError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}
