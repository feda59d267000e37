//! Combining retrieval sources into one deduplicated capability set.

use serde::{Deserialize, Serialize};

use super::CapabilityMap;

/// Observability counters for one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Hits per source, in merge order.
    pub per_source: [usize; 3],
    /// Sum of per-source hit counts.
    pub raw_hits: usize,
    /// Size of the union.
    pub unique: usize,
    /// `raw_hits - unique`.
    pub duplicates: usize,
}

/// The union of all retrieval sources for one query.
#[derive(Debug, Clone, Default)]
pub struct MergedCapabilities {
    pub capabilities: CapabilityMap,
    pub report: MergeReport,
}

impl MergedCapabilities {
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// Merge the explicit-name, similarity and history sources by key.
///
/// The first occurrence of a name wins, so the result order is
/// deterministic: explicit names, then similarity order, then history.
pub fn merge_sources(
    by_name: CapabilityMap,
    by_similarity: CapabilityMap,
    by_history: CapabilityMap,
) -> MergedCapabilities {
    let per_source = [by_name.len(), by_similarity.len(), by_history.len()];
    let raw_hits: usize = per_source.iter().sum();

    let mut capabilities = by_name;
    for (name, capability) in by_similarity.into_iter().chain(by_history) {
        capabilities.entry(name).or_insert(capability);
    }

    let unique = capabilities.len();
    let report = MergeReport {
        per_source,
        raw_hits,
        unique,
        duplicates: raw_hits - unique,
    };
    log::info!(
        "Merged capabilities: names={} similarity={} history={} raw={} unique={} duplicates={}",
        per_source[0],
        per_source[1],
        per_source[2],
        raw_hits,
        unique,
        report.duplicates
    );

    MergedCapabilities {
        capabilities,
        report,
    }
}
