use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::PipelineSettings;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestion pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores product vectors.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for product storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate image and description vectors.
    pub embedding_provider: EmbeddingProvider,
    /// Endpoint of the remote embedding API.
    pub embedding_url: String,
    /// Optional bearer token for the remote embedding API.
    pub embedding_api_key: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of both produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime serving the vision labeler.
    pub ollama_url: String,
    /// Vision model used to label product images.
    pub labeler_model: String,
    /// Upper bound on concurrently processed records.
    pub max_workers: usize,
    /// Number of records per bulk insert.
    pub insert_batch_size: usize,
    /// Number of identifiers per duplicate-check query.
    pub duplicate_check_batch_size: usize,
    /// Wall-clock bound for a single record, in seconds.
    pub task_timeout_secs: u64,
    /// Idle period after which a partial batch is flushed, in seconds.
    pub insert_idle_timeout_secs: u64,
    /// Time allowed for the insertion worker to drain on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Largest edge, in pixels, of images sent to the labeler.
    pub image_max_dimension: u32,
    /// JPEG quality used when re-encoding images for the labeler.
    pub image_jpeg_quality: u8,
    /// Optional cap on cached images; unset keeps every image for the run.
    pub image_cache_max_entries: Option<usize>,
    /// Optional JSON-lines file receiving backup summaries.
    pub backup_path: Option<PathBuf>,
    /// Interval between progress log lines, in seconds.
    pub progress_interval_secs: u64,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote Jina-compatible multimodal embeddings API.
    Jina,
    /// Local deterministic hashing embedder.
    Hashing,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvSource { lookup };
        let config = Self {
            qdrant_url: vars.required("QDRANT_URL")?,
            qdrant_collection_name: vars
                .optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "product_collection".to_string()),
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            embedding_provider: vars
                .optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Hashing),
            embedding_url: vars
                .optional("EMBEDDING_URL")
                .unwrap_or_else(|| "https://api.jina.ai/v1/embeddings".to_string()),
            embedding_api_key: vars.optional("EMBEDDING_API_KEY"),
            embedding_model: vars
                .optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "jina-embeddings-v4".to_string()),
            embedding_dimension: vars.parsed("EMBEDDING_DIMENSION")?,
            ollama_url: vars
                .optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            labeler_model: vars
                .optional("LABELER_MODEL")
                .unwrap_or_else(|| "qwen2.5vl:latest".to_string()),
            max_workers: vars.parsed_or("MAX_WORKERS", 1)?,
            insert_batch_size: vars.parsed_or("INSERT_BATCH_SIZE", 5)?,
            duplicate_check_batch_size: vars.parsed_or("DUPLICATE_CHECK_BATCH_SIZE", 100)?,
            task_timeout_secs: vars.parsed_or("TASK_TIMEOUT_SECS", 180)?,
            insert_idle_timeout_secs: vars.parsed_or("INSERT_IDLE_TIMEOUT_SECS", 5)?,
            shutdown_timeout_secs: vars.parsed_or("SHUTDOWN_TIMEOUT_SECS", 60)?,
            image_max_dimension: vars.parsed_or("IMAGE_MAX_DIMENSION", 512)?,
            image_jpeg_quality: vars.parsed_or("IMAGE_JPEG_QUALITY", 90)?,
            image_cache_max_entries: vars.parsed_optional("IMAGE_CACHE_MAX_ENTRIES")?,
            backup_path: vars.optional("BACKUP_PATH").map(PathBuf::from),
            progress_interval_secs: vars.parsed_or("PROGRESS_INTERVAL_SECS", 10)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Tunables consumed by [`crate::pipeline::IngestionPipeline`].
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_workers: self.max_workers,
            insert_batch_size: self.insert_batch_size,
            duplicate_check_batch_size: self.duplicate_check_batch_size,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            insert_idle_timeout: Duration::from_secs(self.insert_idle_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            image_max_dimension: self.image_max_dimension,
            image_jpeg_quality: self.image_jpeg_quality,
            image_cache_max_entries: self.image_cache_max_entries,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("EMBEDDING_DIMENSION", self.embedding_dimension),
            ("MAX_WORKERS", self.max_workers),
            ("INSERT_BATCH_SIZE", self.insert_batch_size),
            ("DUPLICATE_CHECK_BATCH_SIZE", self.duplicate_check_batch_size),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue((*key).to_string()));
        }
        let timeouts = [
            ("TASK_TIMEOUT_SECS", self.task_timeout_secs),
            ("INSERT_IDLE_TIMEOUT_SECS", self.insert_idle_timeout_secs),
            ("SHUTDOWN_TIMEOUT_SECS", self.shutdown_timeout_secs),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::InvalidValue((*key).to_string()));
        }
        if self.image_jpeg_quality == 0 || self.image_jpeg_quality > 100 {
            return Err(ConfigError::InvalidValue("IMAGE_JPEG_QUALITY".to_string()));
        }
        if self.image_max_dimension == 0 {
            return Err(ConfigError::InvalidValue("IMAGE_MAX_DIMENSION".to_string()));
        }
        Ok(())
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        self.required(key)?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string()))
    }

    fn parsed_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parsed_optional(key)?.unwrap_or(default))
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jina" => Ok(Self::Jina),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        labeler_model = %config.labeler_model,
        max_workers = config.max_workers,
        insert_batch_size = config.insert_batch_size,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
