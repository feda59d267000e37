//! Core abstractions for semantic retrieval.

#[cfg(test)]
pub mod testing;

use std::fmt;

use async_trait::async_trait;

use crate::utilities::errors::SclError;

/// A single embedding vector.
pub type Embedding = Vec<f32>;

/// Port for the embedding collaborator.
///
/// Implementations must be stable: the same text yields the same vector,
/// modulo provider nondeterminism.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + fmt::Debug {
    /// Provider name used in logs and errors (e.g. "openai").
    fn provider_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding, SclError>;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
