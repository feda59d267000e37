//! # Capabilities
//!
//! A capability is either a `function_call` (schema plus an entry in the
//! function table, offered to the model as a tool) or a `skill` (descriptive
//! metadata that is retrievable but never offered or invoked).
//!
//! ## Retrieval Flow
//!
//! 1. The conversation embeds its opening user turn.
//! 2. `CapabilityRegistry::retrieve` queries three sources concurrently:
//!    explicit names, embedding similarity, and conversation history.
//! 3. `merge_sources` unions them by name, first occurrence winning.
//! 4. `CapabilityRegistry::tool_list` turns the function calls of the union
//!    into tool schemas for the completion request.

pub mod capability;
pub mod merge;
pub mod metrics;
pub mod registry;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::utilities::config::{DEFAULT_LIMIT, DEFAULT_MIN_SIMILARITY};

pub use capability::{Capability, CapabilityType, FunctionSchema, LlmDescription};
pub use merge::{merge_sources, MergeReport, MergedCapabilities};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use registry::CapabilityRegistry;

/// Capabilities keyed by unique name, in retrieval order.
pub type CapabilityMap = IndexMap<String, Capability>;

/// Bounds applied to the similarity and history sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Maximum hits per source.
    pub limit: usize,
    /// Cosine similarity threshold, inclusive.
    pub min_similarity: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

impl RetrievalParams {
    /// Apply per-request overrides, clamping them into the valid range.
    pub fn with_hint(self, hint: &RetrievalHint) -> Self {
        Self {
            limit: hint.limit.map(|l| l.max(1)).unwrap_or(self.limit),
            min_similarity: hint
                .min_similarity
                .filter(|s| s.is_finite())
                .map(|s| s.clamp(0.0, 1.0))
                .unwrap_or(self.min_similarity),
        }
    }
}

/// Optional per-request retrieval overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHint {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
}
