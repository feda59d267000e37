//! Process configuration read from the environment.
//!
//! `SclConfig::from_env()` is called once at start-up and the resulting
//! values are handed to the collaborators that need them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::RetrievalParams;
use crate::utilities::errors::SclError;

/// Default number of capabilities returned per retrieval source.
pub const DEFAULT_LIMIT: usize = 5;
/// Default similarity threshold for retrieval.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SclConfig {
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "BAAI/bge-large-zh-v1.5".to_string(),
            dimensions: 1024,
            api_key: None,
            base_url: "https://api.siliconflow.cn/v1".to_string(),
        }
    }
}

/// Timeouts attached to the three external calls, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub embedding_secs: u64,
    pub store_secs: u64,
    pub completion_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_secs: 30,
            store_secs: 10,
            completion_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs)
    }
}

/// Which capability store backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Fs,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = SclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "fs" | "filesystem" => Ok(Self::Fs),
            "postgres" | "pg" | "pgvector" => Ok(Self::Postgres),
            other => Err(SclError::Config(format!("unknown store backend '{}'", other))),
        }
    }
}

/// Store selection and backend locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
    pub skills_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: PathBuf::from("scl_capabilities.db"),
            skills_dir: PathBuf::from("skills"),
            database_url: None,
        }
    }
}

impl SclConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, SclError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Blank values count as
    /// unset.
    ///
    /// API keys are resolved here and nowhere else: the completion key is
    /// `API_KEY` then `OPENAI_API_KEY`; the embedding key is
    /// `EMBEDDING_API_KEY`, then the completion key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SclError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(limit) = parse_value::<usize>("LIMIT", var("LIMIT"))? {
            config.retrieval.limit = limit;
        }
        if let Some(min_similarity) = parse_value::<f32>("MIN_SIMILARITY", var("MIN_SIMILARITY"))? {
            config.retrieval.min_similarity = min_similarity;
        }

        if let Some(model) = var("MODEL") {
            config.completion.model = model;
        }
        config.completion.api_key = var("API_KEY").or_else(|| var("OPENAI_API_KEY"));
        if let Some(base_url) = var("BASE_URL") {
            config.completion.base_url = base_url;
        }

        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dims) = parse_value::<usize>("EMBEDDING_MODEL_DIMS", var("EMBEDDING_MODEL_DIMS"))? {
            config.embedding.dimensions = dims;
        }
        let completion_key = config.completion.api_key.clone();
        config.embedding.api_key = var("EMBEDDING_API_KEY").or(completion_key);
        if let Some(base_url) = var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = base_url;
        }

        if let Some(secs) = parse_value::<u64>("EMBED_TIMEOUT_SECS", var("EMBED_TIMEOUT_SECS"))? {
            config.timeouts.embedding_secs = secs;
        }
        if let Some(secs) = parse_value::<u64>("STORE_TIMEOUT_SECS", var("STORE_TIMEOUT_SECS"))? {
            config.timeouts.store_secs = secs;
        }
        if let Some(secs) =
            parse_value::<u64>("COMPLETION_TIMEOUT_SECS", var("COMPLETION_TIMEOUT_SECS"))?
        {
            config.timeouts.completion_secs = secs;
        }

        if let Some(backend) = var("SCL_STORE") {
            config.store.backend = backend.parse()?;
        }
        if let Some(path) = var("SCL_SQLITE_PATH") {
            config.store.sqlite_path = PathBuf::from(path);
        }
        if let Some(dir) = var("SCL_SKILLS_DIR") {
            config.store.skills_dir = PathBuf::from(dir);
        }
        config.store.database_url = var("DATABASE_URL");

        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot operate with.
    pub fn validate(&self) -> Result<(), SclError> {
        if self.retrieval.limit == 0 {
            return Err(SclError::Config("limit must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(SclError::Config(format!(
                "min_similarity must be within [0, 1], got {}",
                self.retrieval.min_similarity
            )));
        }
        if self.timeouts.embedding_secs == 0
            || self.timeouts.store_secs == 0
            || self.timeouts.completion_secs == 0
        {
            return Err(SclError::Config("timeouts must be non-zero".to_string()));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(SclError::Config(
                "SCL_STORE=postgres requires DATABASE_URL".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, SclError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SclError::Config(format!("invalid {}='{}': {}", key, raw, e))),
        None => Ok(None),
    }
}
