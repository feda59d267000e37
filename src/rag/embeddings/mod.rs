//! Embedding provider construction.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use crate::rag::core::EmbeddingProvider;
use crate::utilities::config::EmbeddingConfig;
use crate::utilities::errors::SclError;

pub use providers::{OpenAIEmbedding, OpenAIProviderConfig};

/// Build the embedding collaborator described by `config`.
///
/// `timeout` bounds the HTTP client; the conversation loop applies its own
/// timeout on top of it.
pub fn build_embedder(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingProvider>, SclError> {
    if config.model.trim().is_empty() {
        return Err(SclError::Config("embedding model must not be empty".to_string()));
    }
    let mut provider_config = OpenAIProviderConfig::from(config);
    provider_config.timeout_secs = timeout.as_secs().max(1);
    log::debug!(
        "Building embedder: model={}, base={}",
        provider_config.model_name,
        provider_config.api_base
    );
    Ok(Arc::new(OpenAIEmbedding::with_config(provider_config)?))
}
