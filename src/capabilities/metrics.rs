//! Cumulative retrieval and invocation counters for a registry.
//!
//! Counters are shared by every clone of a registry and only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::merge::MergeReport;

/// Live counters. Read them through [`RegistryMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    searches: AtomicU64,
    raw_hits: AtomicU64,
    unique_hits: AtomicU64,
    duplicates: AtomicU64,
    search_micros: AtomicU64,
    invocations: AtomicU64,
    invocation_failures: AtomicU64,
    execute_micros: AtomicU64,
}

/// Point-in-time copy of [`RegistryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Completed `retrieve` calls.
    pub searches: u64,
    /// Sum of per-source hits over all searches.
    pub raw_hits: u64,
    /// Sum of merged result sizes.
    pub unique_hits: u64,
    /// Hits dropped by the merge.
    pub duplicates: u64,
    pub search_time_micros: u64,
    pub invocations: u64,
    pub invocation_failures: u64,
    pub execute_time_micros: u64,
}

impl MetricsSnapshot {
    /// Mean `retrieve` latency, if any search ran.
    pub fn mean_search_time(&self) -> Option<Duration> {
        (self.searches > 0).then(|| Duration::from_micros(self.search_time_micros / self.searches))
    }

    /// Mean invocation latency, if anything was invoked.
    pub fn mean_execute_time(&self) -> Option<Duration> {
        (self.invocations > 0)
            .then(|| Duration::from_micros(self.execute_time_micros / self.invocations))
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_search(&self, report: &MergeReport, elapsed: Duration) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.raw_hits.fetch_add(report.raw_hits as u64, Ordering::Relaxed);
        self.unique_hits.fetch_add(report.unique as u64, Ordering::Relaxed);
        self.duplicates.fetch_add(report.duplicates as u64, Ordering::Relaxed);
        self.search_micros.fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn record_invocation(&self, succeeded: bool, elapsed: Duration) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.invocation_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.execute_micros.fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            searches: self.searches.load(Ordering::Relaxed),
            raw_hits: self.raw_hits.load(Ordering::Relaxed),
            unique_hits: self.unique_hits.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            search_time_micros: self.search_micros.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            invocation_failures: self.invocation_failures.load(Ordering::Relaxed),
            execute_time_micros: self.execute_micros.load(Ordering::Relaxed),
        }
    }
}
