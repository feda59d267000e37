//! Capability Registry: retrieval, merging and invocation on top of a
//! capability store and a function table.
//!
//! Retrieval never fails. Each store call is bounded by a timeout and a
//! timed-out source contributes nothing. Invocation failures are surfaced
//! to the caller.
//!
//! Tools are offered to the model under their schema name, which may differ
//! from the capability name. [`CapabilityRegistry::offered_tools`] keys the
//! offered set by schema name so a selection always resolves back to the
//! capability that was offered.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::capability::{Capability, LlmDescription};
use super::merge::{merge_sources, MergedCapabilities};
use super::metrics::{MetricsSnapshot, RegistryMetrics};
use super::{CapabilityMap, RetrievalParams};
use crate::chat::state::ConversationState;
use crate::storage::CapabilityStore;
use crate::tools::function_table::{Arguments, FunctionTable};
use crate::utilities::errors::SclError;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves, merges and invokes capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    store: Arc<dyn CapabilityStore>,
    functions: FunctionTable,
    store_timeout: Duration,
    metrics: Arc<RegistryMetrics>,
}

impl CapabilityRegistry {
    pub fn new(store: Arc<dyn CapabilityStore>, functions: FunctionTable) -> Self {
        Self {
            store,
            functions,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            metrics: Arc::new(RegistryMetrics::new()),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn CapabilityStore> {
        &self.store
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Cumulative search and invocation counters since construction.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Await a store read, substituting `fallback` on timeout.
    async fn bounded<T, F>(&self, source: &str, fallback: T, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(value) => value,
            Err(_) => {
                log::warn!(
                    "{} lookup on {} store timed out after {:?}, using empty result",
                    source,
                    self.store.backend(),
                    self.store_timeout
                );
                fallback
            }
        }
    }

    /// Look up each name. Unknown names are omitted.
    pub async fn get_by_names<S: AsRef<str>>(&self, names: &[S]) -> CapabilityMap {
        let mut found = CapabilityMap::new();
        let mut seen = HashSet::new();
        for name in names.iter().map(AsRef::as_ref) {
            if !seen.insert(name) {
                continue;
            }
            let hit = self.bounded("Name", None, self.store.get_by_name(name)).await;
            match hit {
                Some(capability) => {
                    found.insert(name.to_string(), capability);
                }
                None => log::debug!("Capability '{}' not found", name),
            }
        }
        log::info!("get_by_names: requested={} found={}", seen.len(), found.len());
        found
    }

    /// Capabilities whose description is similar to the conversation's
    /// opening turn.
    pub async fn get_by_similarity(
        &self,
        state: &ConversationState,
        limit: usize,
        min_similarity: f32,
    ) -> CapabilityMap {
        let mut found = self
            .bounded(
                "Similarity",
                CapabilityMap::new(),
                self.store
                    .search_by_similarity(state.query_embedding(), limit, min_similarity),
            )
            .await;
        found.truncate(limit);
        log::info!(
            "get_by_similarity: limit={} min_similarity={} found={}",
            limit,
            min_similarity,
            found.len()
        );
        found
    }

    /// Capabilities suggested by recorded usage.
    pub async fn get_by_history(
        &self,
        state: &ConversationState,
        limit: usize,
        min_similarity: f32,
    ) -> CapabilityMap {
        let mut found = self
            .bounded(
                "History",
                CapabilityMap::new(),
                self.store.history_lookup(state, limit, min_similarity),
            )
            .await;
        found.truncate(limit);
        log::debug!("get_by_history: found={}", found.len());
        found
    }

    /// Union of the three sources, first occurrence winning.
    pub fn merge(
        &self,
        by_name: CapabilityMap,
        by_similarity: CapabilityMap,
        by_history: CapabilityMap,
    ) -> MergedCapabilities {
        merge_sources(by_name, by_similarity, by_history)
    }

    /// Query all three sources concurrently and merge them.
    ///
    /// The merge order is fixed, so the result does not depend on which
    /// source answers first.
    pub async fn retrieve<S: AsRef<str>>(
        &self,
        state: &ConversationState,
        names: &[S],
        params: &RetrievalParams,
    ) -> MergedCapabilities {
        let started = Instant::now();
        let (by_name, by_similarity, by_history) = futures::join!(
            self.get_by_names(names),
            self.get_by_similarity(state, params.limit, params.min_similarity),
            self.get_by_history(state, params.limit, params.min_similarity),
        );
        let merged = self.merge(by_name, by_similarity, by_history);
        let elapsed = started.elapsed();
        self.metrics.record_search(&merged.report, elapsed);
        log::debug!("Capability search took {:?}", elapsed);
        merged
    }

    /// Function calls of `capabilities` keyed by the schema name offered to
    /// the model. Skills are dropped, and when two capabilities share a
    /// schema name the first one wins.
    pub fn offered_tools(capabilities: &CapabilityMap) -> CapabilityMap {
        let mut offered = CapabilityMap::new();
        for capability in capabilities.values().filter(|c| !c.is_skill()) {
            let Some(description) = capability.llm_description() else {
                log::warn!("Capability '{}' has no tool schema, not offered", capability.name());
                continue;
            };
            match offered.get(description.name()) {
                Some(first) => log::warn!(
                    "Capabilities '{}' and '{}' share tool name '{}', offering '{}'",
                    first.name(),
                    capability.name(),
                    description.name(),
                    first.name()
                ),
                None => {
                    offered.insert(description.name().to_string(), capability.clone());
                }
            }
        }
        offered
    }

    /// Tool schemas for the completion request. Skills are never offered
    /// and tool names are unique.
    pub fn tool_list(capabilities: &CapabilityMap) -> Vec<LlmDescription> {
        Self::offered_tools(capabilities)
            .values()
            .filter_map(|capability| capability.llm_description().cloned())
            .collect()
    }

    /// Find the capability behind a tool name chosen by the model: the
    /// offered set (keyed by schema name) first, then the store by name.
    pub async fn resolve(&self, tool_name: &str, offered: &CapabilityMap) -> Option<Capability> {
        if let Some(capability) = offered.get(tool_name) {
            return Some(capability.clone());
        }
        self.get_by_names(&[tool_name]).await.shift_remove(tool_name)
    }

    /// Execute a function-call capability.
    ///
    /// The body runs on the blocking thread pool so a slow function cannot
    /// stall the async workers.
    pub async fn invoke(&self, capability: &Capability, args: &Arguments) -> Result<Value, SclError> {
        let started = Instant::now();
        let result = self.invoke_body(capability, args).await;
        let elapsed = started.elapsed();
        self.metrics.record_invocation(result.is_ok(), elapsed);
        log::debug!("Capability '{}' executed in {:?}", capability.name(), elapsed);
        result
    }

    async fn invoke_body(&self, capability: &Capability, args: &Arguments) -> Result<Value, SclError> {
        if capability.is_skill() {
            return Err(SclError::InvalidCapabilityType {
                name: capability.name().to_string(),
            });
        }
        let name = capability.name();

        if let Some(description) = capability.llm_description() {
            if let Some(missing) = description
                .required_parameters()
                .into_iter()
                .find(|param| !args.contains_key(param))
            {
                return Err(SclError::invocation(
                    name,
                    format!("missing required argument '{}'", missing),
                ));
            }
        }

        let key = capability
            .function_impl()
            .ok_or_else(|| SclError::invocation(name, "no implementation key"))?;
        let func = self.functions.get(key).ok_or_else(|| {
            SclError::invocation(name, format!("no implementation registered under '{}'", key))
        })?;

        log::debug!("Invoking '{}' via '{}'", name, key);
        let args = args.clone();
        match tokio::task::spawn_blocking(move || func(&args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => {
                log::warn!("Capability '{}' failed: {}", name, fault);
                Err(SclError::invocation_fault(name, fault))
            }
            Err(e) if e.is_panic() => {
                log::error!("Capability '{}' panicked", name);
                Err(SclError::invocation(name, "capability body panicked"))
            }
            Err(e) => Err(SclError::invocation(name, format!("execution aborted: {}", e))),
        }
    }

    /// Record a use of `capability`. Failures are logged, never returned.
    pub async fn record(&self, state: &ConversationState, capability: &Capability) {
        let outcome = tokio::time::timeout(self.store_timeout, self.store.record(state, capability)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Recording use of '{}' failed: {}", capability.name(), e),
            Err(_) => log::warn!("Recording use of '{}' timed out", capability.name()),
        }
    }
}
