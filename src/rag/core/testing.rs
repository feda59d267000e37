//! Deterministic embedders for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Embedding, EmbeddingProvider};
use crate::utilities::errors::SclError;

/// Topic axes understood by [`KeywordEmbedder::topics`].
pub const TOPICS: &[&[&str]] = &[
    &["compare", "bigger", "smaller", "larger", " vs ", "which"],
    &["sum", "add", "plus"],
    &["product", "multiply", "times"],
    &["letter", "count", "spell"],
    &["pdf", "document"],
    &["art", "p5.js", "generative"],
];

/// Embeds text as keyword hit counts per topic axis.
#[derive(Debug)]
pub struct KeywordEmbedder {
    axes: Vec<Vec<String>>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(axes: &[&[&str]]) -> Self {
        Self {
            axes: axes
                .iter()
                .map(|axis| axis.iter().map(|k| k.to_string()).collect())
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn topics() -> Self {
        Self::new(TOPICS)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn provider_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Embedding, SclError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = format!(" {} ", text.to_lowercase());
        Ok(self
            .axes
            .iter()
            .map(|axis| axis.iter().map(|k| text.matches(k.as_str()).count() as f32).sum())
            .collect())
    }
}

/// Embedder that always reports the upstream as unavailable.
#[derive(Debug, Default)]
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    fn provider_name(&self) -> &str {
        "unavailable"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding, SclError> {
        Err(SclError::upstream("unavailable", "connection refused"))
    }
}
