//! Capability store interface.
//!
//! Read operations never fail: a backend that cannot answer logs the cause
//! and returns an empty result so that retrieval degrades instead of
//! failing the conversation. Administrative operations report
//! [`StoreError`].

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;

use crate::capabilities::{Capability, CapabilityMap};
use crate::chat::state::ConversationState;
use crate::rag::core::{cosine_similarity, EmbeddingProvider};
use crate::utilities::errors::StoreError;

/// Abstract base trait defining the capability store contract.
///
/// All store backends must implement this trait.
#[async_trait]
pub trait CapabilityStore: Send + Sync + fmt::Debug {
    /// Backend identifier used in logs.
    fn backend(&self) -> &str;

    /// Exact-match lookup. A miss is `None`, not an error.
    async fn get_by_name(&self, name: &str) -> Option<Capability>;

    /// Capabilities whose similarity to `query_embedding` is at least
    /// `min_similarity`, most similar first, at most `limit` entries.
    async fn search_by_similarity(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> CapabilityMap;

    /// Log that `capability` was used in `state`. Best effort.
    async fn record(
        &self,
        _state: &ConversationState,
        _capability: &Capability,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    /// Capabilities suggested by recorded usage.
    ///
    /// No learning rule is defined yet, so the default returns nothing.
    async fn history_lookup(
        &self,
        _state: &ConversationState,
        _limit: usize,
        _min_similarity: f32,
    ) -> CapabilityMap {
        CapabilityMap::new()
    }

    /// Add a capability. Names are unique: a second insert under the same
    /// name fails with [`StoreError::Duplicate`].
    async fn insert(&self, capability: Capability) -> Result<(), StoreError>;

    /// Replace the stored capability with the same name.
    async fn update(&self, capability: Capability) -> Result<(), StoreError>;

    /// Remove a capability. Returns whether anything was removed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Up to `limit` stored capabilities in insertion order.
    async fn list(&self, limit: usize) -> Vec<Capability>;
}

/// Filter scored candidates by threshold, sort by descending similarity and
/// keep the best `limit`.
///
/// Ties keep candidate order. NaN scores never pass the threshold.
pub fn rank_by_similarity(
    mut scored: Vec<(f32, Capability)>,
    limit: usize,
    min_similarity: f32,
) -> CapabilityMap {
    scored.retain(|(score, _)| *score >= min_similarity);
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    for (score, capability) in &scored {
        log::debug!("Capability '{}' matched with similarity {:.4}", capability.name(), score);
    }
    scored
        .into_iter()
        .map(|(_, capability)| (capability.name().to_string(), capability))
        .collect()
}

/// Score capabilities against a query using their memoized description
/// embeddings. Capabilities whose embedding cannot be derived are skipped.
pub async fn score_capabilities<I>(
    capabilities: I,
    query_embedding: &[f32],
    embedder: &dyn EmbeddingProvider,
) -> Vec<(f32, Capability)>
where
    I: IntoIterator<Item = Capability>,
{
    let mut scored = Vec::new();
    for capability in capabilities {
        match capability.embedding(embedder).await {
            Ok(vector) => {
                let score = cosine_similarity(query_embedding, vector);
                scored.push((score, capability));
            }
            Err(e) => log::warn!(
                "Skipping capability '{}' in similarity search: {}",
                capability.name(),
                e
            ),
        }
    }
    scored
}
