#![forbid(unsafe_code)]

//! Bounded in-memory metrics store.
//!
//! Holds the global counters, per-name sample series, and the issue and
//! error logs. Every bounded collection evicts its oldest entries (FIFO)
//! once it reaches its configured cap, preserving recency over
//! completeness.
//!
//! # Invariants
//!
//! 1. No bounded collection ever exceeds its cap after an insert.
//! 2. Eviction removes the oldest entries first.
//! 3. `issue_total` / `error_total` are monotone until [`reset`](MetricsStore::reset)
//!    and survive FIFO eviction, so exported counters stay monotone within
//!    a collection epoch.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

/// One recorded sample in a named series.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    /// Sample value.
    pub value: f64,
    /// Epoch milliseconds at record time.
    pub at_ms: u64,
    /// Free-form key/value tags.
    pub tags: Vec<(String, String)>,
}

/// A performance issue before the store stamps it.
#[derive(Debug, Clone)]
pub struct IssueReport {
    /// Issue kind, e.g. `slow_compute`.
    pub kind: String,
    /// Registry id of the entity involved.
    pub entity: String,
    /// Human-readable detail.
    pub detail: String,
}

/// A stamped performance issue.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceIssue {
    pub kind: String,
    pub entity: String,
    pub detail: String,
    /// Epoch milliseconds at report time.
    pub at_ms: u64,
}

/// A recorded error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Error kind, e.g. `subscriber_panic`.
    pub kind: String,
    pub message: String,
    /// Where it happened (usually a registry id).
    pub context: String,
    /// Epoch milliseconds at record time.
    pub at_ms: u64,
}

/// Process-wide counters refreshed by summing live registry entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalCounters {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_renders: u64,
    pub slow_renders: u64,
}

/// The bounded metrics sink. One logical instance per system; reset on
/// request, never persisted.
#[derive(Debug, Default)]
pub struct MetricsStore {
    counters: GlobalCounters,
    issue_total: u64,
    error_total: u64,
    series: BTreeMap<String, VecDeque<MetricSample>>,
    issues: VecDeque<PerformanceIssue>,
    errors: VecDeque<ErrorRecord>,
}

impl MetricsStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current global counters.
    #[must_use]
    pub fn counters(&self) -> GlobalCounters {
        self.counters
    }

    /// Replace the global counters (aggregation refresh).
    pub fn set_counters(&mut self, counters: GlobalCounters) {
        self.counters = counters;
    }

    /// Append a sample to the named series, evicting FIFO beyond `cap`.
    pub fn record_sample(&mut self, name: &str, sample: MetricSample, cap: usize) {
        let series = self.series.entry(name.to_string()).or_default();
        series.push_back(sample);
        while series.len() > cap {
            series.pop_front();
        }
    }

    /// Append a stamped issue, evicting FIFO beyond `cap`.
    pub fn record_issue(&mut self, issue: PerformanceIssue, cap: usize) {
        self.issue_total += 1;
        self.issues.push_back(issue);
        while self.issues.len() > cap {
            self.issues.pop_front();
        }
    }

    /// Append an error record, evicting FIFO beyond `cap`.
    pub fn record_error(&mut self, record: ErrorRecord, cap: usize) {
        self.error_total += 1;
        self.errors.push_back(record);
        while self.errors.len() > cap {
            self.errors.pop_front();
        }
    }

    /// The series recorded under `name`, if any.
    #[must_use]
    pub fn series(&self, name: &str) -> Option<&VecDeque<MetricSample>> {
        self.series.get(name)
    }

    /// All series, keyed by name.
    #[must_use]
    pub fn series_map(&self) -> &BTreeMap<String, VecDeque<MetricSample>> {
        &self.series
    }

    /// The bounded issue log, oldest first.
    #[must_use]
    pub fn issues(&self) -> &VecDeque<PerformanceIssue> {
        &self.issues
    }

    /// The bounded error log, oldest first.
    #[must_use]
    pub fn errors(&self) -> &VecDeque<ErrorRecord> {
        &self.errors
    }

    /// Cumulative issues since the last reset (monotone, eviction-proof).
    #[must_use]
    pub fn issue_total(&self) -> u64 {
        self.issue_total
    }

    /// Cumulative errors since the last reset (monotone, eviction-proof).
    #[must_use]
    pub fn error_total(&self) -> u64 {
        self.error_total
    }

    /// Drop all collected metrics, counters, and totals.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
