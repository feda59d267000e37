//! Completion system.
//!
//! - [`base_llm`] - The completion provider trait and response types
//! - [`providers`] - Provider implementations (OpenAI-compatible)

pub mod base_llm;
pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use crate::utilities::config::CompletionConfig;
use crate::utilities::errors::SclError;

// Re-exports for convenience
pub use base_llm::{CompletionProvider, CompletionResponse, TokenUsage};
pub use providers::OpenAICompletion;

/// Build the completion collaborator described by `config`.
pub fn build_completion(
    config: &CompletionConfig,
    timeout: Duration,
) -> Result<Arc<dyn CompletionProvider>, SclError> {
    if config.model.trim().is_empty() {
        return Err(SclError::Config("completion model must not be empty".to_string()));
    }
    log::debug!(
        "Building completion provider: model={}, base={}",
        config.model,
        config.base_url
    );
    Ok(Arc::new(OpenAICompletion::new(config, timeout)?))
}
