//! OpenAI-compatible embedding provider.
//!
//! Talks to any endpoint implementing `POST {base_url}/embeddings`
//! (OpenAI, SiliconFlow, vLLM, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rag::core::{Embedding, EmbeddingProvider};
use crate::utilities::config::EmbeddingConfig;
use crate::utilities::errors::{body_preview, SclError};

/// Configuration for the OpenAI embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model_name: String,
    pub api_base: String,
    /// Requested vector size; omitted from the request when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for OpenAIProviderConfig {
    fn default() -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            api_key: None,
            model_name: defaults.model,
            api_base: defaults.base_url,
            dimensions: Some(defaults.dimensions),
            timeout_secs: 30,
        }
    }
}

impl From<&EmbeddingConfig> for OpenAIProviderConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model_name: config.model.clone(),
            api_base: config.base_url.clone(),
            dimensions: Some(config.dimensions),
            timeout_secs: 30,
        }
    }
}

/// Embedding client for OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    pub config: OpenAIProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAIEmbedding {
    pub fn with_config(config: OpenAIProviderConfig) -> Result<Self, SclError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SclError::upstream("openai-embedding", e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Build the JSON request body for one text.
    pub fn build_request_body(&self, text: &str) -> Value {
        // Newlines degrade embedding quality on several providers.
        let input = text.replace('\n', " ");
        let mut body = serde_json::json!({
            "model": self.config.model_name,
            "input": [input],
        });
        if let Some(dims) = self.config.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }
        body
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    fn provider_name(&self) -> &str {
        "openai-embedding"
    }

    async fn embed(&self, text: &str) -> Result<Embedding, SclError> {
        log::debug!(
            "OpenAIEmbedding.embed: model={}, {} chars",
            self.config.model_name,
            text.len()
        );

        let endpoint = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&endpoint)
            .json(&self.build_request_body(text));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SclError::upstream(self.provider_name(), e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SclError::upstream(self.provider_name(), e.to_string()))?;
        if !status.is_success() {
            return Err(SclError::upstream(
                self.provider_name(),
                format!("HTTP {}: {}", status, body_preview(&body, 500)),
            ));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            SclError::upstream(self.provider_name(), format!("malformed response: {}", e))
        })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SclError::upstream(self.provider_name(), "response had no embedding"))
    }
}
