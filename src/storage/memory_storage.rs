//! In-process capability store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::interface::{rank_by_similarity, score_capabilities, CapabilityStore};
use crate::capabilities::{Capability, CapabilityMap};
use crate::chat::state::ConversationState;
use crate::rag::core::EmbeddingProvider;
use crate::utilities::errors::StoreError;

/// Capability store held entirely in memory.
///
/// Description embeddings are derived lazily on the first search and
/// memoized on each capability.
#[derive(Debug)]
pub struct InMemoryCapabilityStore {
    capabilities: RwLock<IndexMap<String, Capability>>,
    usage: DashMap<String, u64>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl InMemoryCapabilityStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            capabilities: RwLock::new(IndexMap::new()),
            usage: DashMap::new(),
            embedder,
        }
    }

    /// Number of recorded uses of `name`.
    pub fn usage_count(&self, name: &str) -> u64 {
        self.usage.get(name).map(|count| *count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Capability> {
        self.capabilities.read().values().cloned().collect()
    }
}

#[async_trait]
impl CapabilityStore for InMemoryCapabilityStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get_by_name(&self, name: &str) -> Option<Capability> {
        self.capabilities.read().get(name).cloned()
    }

    async fn search_by_similarity(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> CapabilityMap {
        // Clones share their embedding cell, so memoization survives the
        // snapshot and the lock is not held across awaits.
        let scored = score_capabilities(self.snapshot(), query_embedding, &*self.embedder).await;
        rank_by_similarity(scored, limit, min_similarity)
    }

    async fn record(
        &self,
        state: &ConversationState,
        capability: &Capability,
    ) -> Result<(), StoreError> {
        *self.usage.entry(capability.name().to_string()).or_insert(0) += 1;
        log::debug!(
            "Recorded use of '{}' in conversation {}",
            capability.name(),
            state.id()
        );
        Ok(())
    }

    async fn insert(&self, capability: Capability) -> Result<(), StoreError> {
        let mut capabilities = self.capabilities.write();
        if capabilities.contains_key(capability.name()) {
            return Err(StoreError::Duplicate(capability.name().to_string()));
        }
        capabilities.insert(capability.name().to_string(), capability);
        Ok(())
    }

    async fn update(&self, capability: Capability) -> Result<(), StoreError> {
        let mut capabilities = self.capabilities.write();
        match capabilities.get_mut(capability.name()) {
            Some(slot) => {
                *slot = capability;
                Ok(())
            }
            None => Err(StoreError::NotFound(capability.name().to_string())),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.usage.remove(name);
        Ok(self.capabilities.write().shift_remove(name).is_some())
    }

    async fn list(&self, limit: usize) -> Vec<Capability> {
        self.capabilities.read().values().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Message;
    use crate::rag::core::testing::KeywordEmbedder;
    use crate::tools::builtin::builtin_capabilities;
    use serde_json::Value;

    async fn seeded() -> (InMemoryCapabilityStore, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::topics());
        let store = InMemoryCapabilityStore::new(embedder.clone());
        for cap in builtin_capabilities() {
            store.insert(cap).await.unwrap();
        }
        (store, embedder)
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_names() {
        let (store, _) = seeded().await;
        let dup = builtin_capabilities().remove(0);
        assert!(matches!(store.insert(dup).await, Err(StoreError::Duplicate(_))));
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_get_by_name_miss_is_none() {
        let (store, _) = seeded().await;
        assert!(store.get_by_name("add").await.is_some());
        assert!(store.get_by_name("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_similarity_respects_threshold_and_limit() {
        let (store, embedder) = seeded().await;
        let query = embedder.embed("9.11 vs 9.9, which is smaller").await.unwrap();

        let hits = store.search_by_similarity(&query, 5, 0.5).await;
        let names: Vec<&str> = hits.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["compare"]);

        let none = store.search_by_similarity(&query, 0, 0.0).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_memoizes_embeddings() {
        let (store, embedder) = seeded().await;
        let query = embedder.embed("add these").await.unwrap();
        store.search_by_similarity(&query, 5, 0.5).await;
        let after_first = embedder.calls();
        store.search_by_similarity(&query, 5, 0.5).await;
        assert_eq!(embedder.calls(), after_first);
    }

    #[tokio::test]
    async fn test_record_counts_usage() {
        let (store, embedder) = seeded().await;
        let state = ConversationState::new(Message::user("5 plus 3"), &*embedder).await.unwrap();
        let add = store.get_by_name("add").await.unwrap();
        store.record(&state, &add).await.unwrap();
        store.record(&state, &add).await.unwrap();
        assert_eq!(store.usage_count("add"), 2);
        assert!(store.history_lookup(&state, 5, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_delete_list() {
        let (store, _) = seeded().await;
        let replacement = Capability::skill("add", "now a skill", Value::Null);
        store.update(replacement).await.unwrap();
        assert!(store.get_by_name("add").await.unwrap().is_skill());

        let missing = Capability::skill("ghost", "", Value::Null);
        assert!(matches!(store.update(missing).await, Err(StoreError::NotFound(_))));

        assert!(store.delete("mul").await.unwrap());
        assert!(!store.delete("mul").await.unwrap());
        let names: Vec<String> = store.list(10).await.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["add", "compare", "count_letter"]);
        assert_eq!(store.list(1).await.len(), 1);
    }
}
