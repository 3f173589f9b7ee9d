//! Vision labeling: the [`Labeler`] contract, the typed label schema, and response parsing.

mod extract;
mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use extract::{LabelParseError, parse_label_response};
pub use ollama::OllamaLabeler;

/// Errors raised while asking a model to label an image.
#[derive(Debug, Error)]
pub enum LabelerError {
    /// The model endpoint could not be reached or returned an error.
    #[error("labeling request failed: {0}")]
    Request(String),
    /// The model answered with an empty response.
    #[error("labeler returned an empty response")]
    EmptyResponse,
}

/// Produces raw label JSON text for an image.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Label `image` and return the model's raw textual answer.
    async fn label(&self, image: &[u8]) -> Result<String, LabelerError>;
}

const DEFAULT_TRADEMARK_LEVEL: &str = "No TM";

/// Structured attributes describing what a product image shows and who it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelAttributes {
    /// Intended receiver of the product.
    #[serde(rename = "image_recipient", deserialize_with = "string_or_seq")]
    pub recipient: Vec<String>,
    /// Likely buyers.
    #[serde(rename = "target_audience", deserialize_with = "string_or_seq")]
    pub audience: Vec<String>,
    /// Why the product is bought.
    #[serde(rename = "usage_purpose", deserialize_with = "string_or_seq")]
    pub purpose: Vec<String>,
    /// Occasions the product fits.
    #[serde(deserialize_with = "string_or_seq")]
    pub occasion: Vec<String>,
    /// Niche or theme.
    #[serde(rename = "niche_theme", deserialize_with = "string_or_seq")]
    pub theme: Vec<String>,
    /// Emotional tone.
    #[serde(rename = "sentiment_tone", deserialize_with = "string_or_seq")]
    pub tone: Vec<String>,
    /// Kind of message the design conveys.
    #[serde(deserialize_with = "string_or_seq")]
    pub message_type: Vec<String>,
    /// Personalization offered.
    #[serde(rename = "personalization_type", deserialize_with = "string_or_seq")]
    pub personalization: Vec<String>,
    /// Product category.
    #[serde(deserialize_with = "string_or_seq")]
    pub product_type: Vec<String>,
    /// Where the product is displayed or used.
    #[serde(rename = "placement_display_context", deserialize_with = "string_or_seq")]
    pub placement: Vec<String>,
    /// Design style.
    #[serde(rename = "design_style", deserialize_with = "string_or_seq")]
    pub style: Vec<String>,
    /// Color palette.
    #[serde(rename = "color_aesthetic", deserialize_with = "string_or_seq")]
    pub color: Vec<String>,
    /// Trademark exposure assessment.
    #[serde(deserialize_with = "string_or_default")]
    pub trademark_level: String,
    /// Elements printed on the product.
    #[serde(deserialize_with = "string_or_seq")]
    pub main_subject: Vec<String>,
    /// Literal text visible on the product.
    #[serde(rename = "text", deserialize_with = "string_or_seq")]
    pub literal_text: Vec<String>,
}

impl Default for LabelAttributes {
    fn default() -> Self {
        Self {
            recipient: Vec::new(),
            audience: Vec::new(),
            purpose: Vec::new(),
            occasion: Vec::new(),
            theme: Vec::new(),
            tone: Vec::new(),
            message_type: Vec::new(),
            personalization: Vec::new(),
            product_type: Vec::new(),
            placement: Vec::new(),
            style: Vec::new(),
            color: Vec::new(),
            trademark_level: default_trademark_level(),
            main_subject: Vec::new(),
            literal_text: Vec::new(),
        }
    }
}

impl LabelAttributes {
    /// Serialize into the JSON object stored as record metadata.
    pub fn to_metadata(&self, image_url: &str) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("image_url".into(), Value::String(image_url.to_string()));
        }
        value
    }
}

fn default_trademark_level() -> String {
    DEFAULT_TRADEMARK_LEVEL.to_string()
}

/// Models sometimes answer a list field with a bare string or `null`.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => vec![text],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(text) => Some(text),
                other => Some(other.to_string()),
            })
            .filter(|text| !text.trim().is_empty())
            .collect(),
        other => vec![other.to_string()],
    })
}

fn string_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) if !text.trim().is_empty() => text,
        Value::Array(items) => items
            .into_iter()
            .find_map(|item| item.as_str().map(str::to_string))
            .unwrap_or_else(default_trademark_level),
        _ => default_trademark_level(),
    })
}
