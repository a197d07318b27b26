#![forbid(unsafe_code)]

//! The observability façade: configuration, registration, sampled metric
//! recording, aggregation, hotspots, Prometheus exposition, and reset.
//!
//! # Design
//!
//! One `ObservabilitySystem` is an explicitly constructed context passed by
//! `Rc` to every cell and computed (dependency injection). For simple use,
//! [`ObservabilitySystem::shared`] returns a documented thread-local
//! default instance. The system is single-threaded by construction
//! (`RefCell` interior mutability, no locks); a multi-threaded host runs
//! one system per thread.
//!
//! # Invariants
//!
//! 1. Sampled recording drops a call entirely or records it entirely.
//! 2. Errors are never sampled away.
//! 3. Aggregation isolates per-entity failures: one misbehaving component
//!    cannot abort the pass.
//! 4. The Prometheus exposition block is byte-stable for a given counter
//!    state.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::rc::{Rc, Weak};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use web_time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::{ConfigPatch, ObserveConfig};
use crate::hotspots::{self, HotspotReport};
use crate::registry::{ObservedCell, Registry, RenderTracked};
use crate::store::{
    ErrorRecord, GlobalCounters, IssueReport, MetricSample, MetricsStore, PerformanceIssue,
};

/// Epoch milliseconds now.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

thread_local! {
    static SHARED: Rc<ObservabilitySystem> =
        Rc::new(ObservabilitySystem::new(ObserveConfig::default()));
}

/// Global metric block of a snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GlobalSnapshot {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_renders: u64,
    pub slow_renders: u64,
    /// Cumulative issues since the last reset.
    pub performance_issues: u64,
    /// Cumulative errors since the last reset.
    pub errors: u64,
    pub live_cells: usize,
    pub live_components: usize,
}

/// Detailed metric block; withheld by default to bound payload size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailedSnapshot {
    pub series: BTreeMap<String, Vec<MetricSample>>,
    pub issues: Vec<PerformanceIssue>,
    pub errors: Vec<ErrorRecord>,
}

/// Result of [`ObservabilitySystem::get_metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed: Option<DetailedSnapshot>,
}

impl MetricsSnapshot {
    /// JSON rendering for dashboard-style consumers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The observability context.
pub struct ObservabilitySystem {
    config: RefCell<ObserveConfig>,
    store: RefCell<MetricsStore>,
    registry: RefCell<Registry>,
}

impl ObservabilitySystem {
    /// Fresh system with the given configuration.
    #[must_use]
    pub fn new(config: ObserveConfig) -> Self {
        Self {
            config: RefCell::new(config),
            store: RefCell::new(MetricsStore::new()),
            registry: RefCell::new(Registry::default()),
        }
    }

    /// The thread-local default instance, for code that does not wire a
    /// context explicitly.
    #[must_use]
    pub fn shared() -> Rc<Self> {
        SHARED.with(Rc::clone)
    }

    /// Apply a partial configuration patch (see [`ObserveConfig::apply`]).
    pub fn configure(&self, patch: ConfigPatch) {
        self.config.borrow_mut().apply(patch);
    }

    /// Snapshot of the active configuration.
    #[must_use]
    pub fn config(&self) -> ObserveConfig {
        self.config.borrow().clone()
    }

    /// Register a reactive cell; returns its fresh `obs-N` id.
    ///
    /// The association is non-owning and is swept once the cell is dropped.
    pub fn register_cell(&self, cell: Weak<dyn ObservedCell>) -> String {
        self.registry.borrow_mut().register_cell(cell)
    }

    /// Register a render-tracked component; returns its fresh `cmp-N` id.
    pub fn register_component(&self, component: Weak<dyn RenderTracked>) -> String {
        self.registry.borrow_mut().register_component(component)
    }

    /// Whether a cell id is currently registered and alive.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.borrow().cell_is_live(id)
    }

    /// Record the declared dependencies of a computed cell.
    pub fn record_edges(&self, cell_id: &str, deps: &[String]) {
        self.registry
            .borrow_mut()
            .record_edges(cell_id, deps.to_vec());
    }

    /// Drop the recorded dependencies of a disposed computed cell.
    pub fn remove_edges(&self, cell_id: &str) {
        self.registry.borrow_mut().remove_edges(cell_id);
    }

    /// Would the edge `cell → dep` close a dependency cycle?
    #[must_use]
    pub fn would_create_cycle(&self, cell_id: &str, dep_id: &str) -> bool {
        self.registry.borrow().would_cycle(cell_id, dep_id)
    }

    /// Record one sample under `name`, subject to the sampling rate.
    ///
    /// A dropped call is dropped entirely: no counters move, nothing is
    /// stored. This is the system's sole overhead-control lever.
    pub fn record_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let (rate, cap) = {
            let config = self.config.borrow();
            (config.sampling_rate, config.max_history_items)
        };
        if rate <= 0.0 {
            return;
        }
        if rate < 1.0 && rand::thread_rng().r#gen::<f64>() >= rate {
            return;
        }
        let sample = MetricSample {
            value,
            at_ms: now_ms(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.store.borrow_mut().record_sample(name, sample, cap);
    }

    /// Record an error. Never sampled: errors are rare and high-value.
    pub fn record_error(&self, kind: &str, message: impl fmt::Display, context: &str) {
        let cap = self.config.borrow().max_errors;
        let record = ErrorRecord {
            kind: kind.to_string(),
            message: message.to_string(),
            context: context.to_string(),
            at_ms: now_ms(),
        };
        tracing::debug!(target: "tattle", kind, context, message = %record.message, "error recorded");
        self.store.borrow_mut().record_error(record, cap);
    }

    /// Stamp and append a performance issue; warn loudly in detailed mode.
    pub fn report_performance_issue(&self, report: IssueReport) {
        let (cap, detailed) = {
            let config = self.config.borrow();
            (config.max_issues, config.detailed_mode)
        };
        let issue = PerformanceIssue {
            kind: report.kind,
            entity: report.entity,
            detail: report.detail,
            at_ms: now_ms(),
        };
        if detailed {
            tracing::warn!(
                target: "tattle",
                kind = %issue.kind,
                entity = %issue.entity,
                detail = %issue.detail,
                "performance issue"
            );
        }
        self.store.borrow_mut().record_issue(issue, cap);
    }

    /// Sweep the registry, then recompute the global counters by summing
    /// the counters of every live entity.
    ///
    /// A component whose stats call fails is logged and skipped; the
    /// aggregation continues over the rest.
    pub fn update_global_counters(&self) {
        let (cells, components) = {
            let mut registry = self.registry.borrow_mut();
            let swept = registry.sweep();
            if swept > 0 {
                tracing::debug!(target: "tattle", swept, "dropped dead registry entries");
            }
            (registry.live_cells(), registry.live_components())
        };

        let mut counters = GlobalCounters::default();
        for (_, cell) in &cells {
            let stats = cell.stats();
            counters.total_reads += stats.reads;
            counters.total_writes += stats.writes;
        }
        for (id, component) in &components {
            match component.render_stats() {
                Ok(stats) => {
                    counters.total_renders += stats.renders;
                    counters.slow_renders += stats.slow_renders;
                }
                Err(err) => self.record_error("component_stats", err, id),
            }
        }
        self.store.borrow_mut().set_counters(counters);
    }

    /// Refresh global counters and return a snapshot.
    ///
    /// The detailed block is included only when asked for or when the
    /// system is in detailed mode.
    #[must_use]
    pub fn get_metrics(&self, include_detailed: bool) -> MetricsSnapshot {
        self.update_global_counters();
        let (live_cells, live_components) = {
            let registry = self.registry.borrow();
            (registry.live_cells().len(), registry.live_components().len())
        };
        let detailed_mode = self.config.borrow().detailed_mode;
        let store = self.store.borrow();
        let counters = store.counters();
        let global = GlobalSnapshot {
            total_reads: counters.total_reads,
            total_writes: counters.total_writes,
            total_renders: counters.total_renders,
            slow_renders: counters.slow_renders,
            performance_issues: store.issue_total(),
            errors: store.error_total(),
            live_cells,
            live_components,
        };
        let detailed = (include_detailed || detailed_mode).then(|| DetailedSnapshot {
            series: store
                .series_map()
                .iter()
                .map(|(name, samples)| (name.clone(), samples.iter().cloned().collect()))
                .collect(),
            issues: store.issues().iter().cloned().collect(),
            errors: store.errors().iter().cloned().collect(),
        });
        MetricsSnapshot { global, detailed }
    }

    /// Rank the busiest components and cells (see [`crate::policy`]).
    #[must_use]
    pub fn find_hotspots(&self) -> HotspotReport {
        let (cells, components) = {
            let mut registry = self.registry.borrow_mut();
            registry.sweep();
            (registry.live_cells(), registry.live_components())
        };
        let cell_stats: Vec<_> = cells
            .iter()
            .map(|(id, cell)| (id.clone(), cell.stats()))
            .collect();
        let mut component_stats = Vec::with_capacity(components.len());
        for (id, component) in &components {
            match component.render_stats() {
                Ok(stats) => component_stats.push((id.clone(), stats)),
                Err(err) => self.record_error("component_stats", err, id),
            }
        }
        hotspots::rank(&cell_stats, &component_stats)
    }

    /// Prometheus text exposition: six counter stanzas, trimmed.
    ///
    /// Byte-for-byte stable for a given counter state; external scrapers
    /// depend on this format.
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        self.update_global_counters();
        let store = self.store.borrow();
        let counters = store.counters();
        let mut out = String::with_capacity(512);
        push_counter(
            &mut out,
            "tattle_total_reads",
            "Total observable reads",
            counters.total_reads,
        );
        push_counter(
            &mut out,
            "tattle_total_writes",
            "Total observable writes",
            counters.total_writes,
        );
        push_counter(
            &mut out,
            "tattle_total_renders",
            "Total component renders",
            counters.total_renders,
        );
        push_counter(
            &mut out,
            "tattle_slow_renders",
            "Renders exceeding the slow threshold",
            counters.slow_renders,
        );
        push_counter(
            &mut out,
            "tattle_performance_issues",
            "Performance issues reported",
            store.issue_total(),
        );
        push_counter(
            &mut out,
            "tattle_errors",
            "Errors recorded",
            store.error_total(),
        );
        out.trim().to_string()
    }

    /// Empty the metrics store and zero the counters of every live
    /// registered entity. The registry itself is NOT cleared: entities
    /// stay registered and queryable by id.
    pub fn reset_metrics(&self) {
        self.store.borrow_mut().reset();
        let (cells, components) = {
            let mut registry = self.registry.borrow_mut();
            registry.sweep();
            (registry.live_cells(), registry.live_components())
        };
        for (_, cell) in &cells {
            cell.reset_stats();
        }
        for (_, component) in &components {
            component.reset_stats();
        }
    }

    /// Begin periodic collection. The returned handle is host-pumped:
    /// call [`CollectionHandle::poll`] from the host loop; a pass runs
    /// whenever `interval` has elapsed since the last one.
    #[must_use]
    pub fn start_periodic_collection(self: &Rc<Self>, interval: Duration) -> CollectionHandle {
        CollectionHandle {
            system: Rc::clone(self),
            interval,
            last: Cell::new(Instant::now()),
            stopped: Cell::new(false),
        }
    }

    /// One collection pass: memory sample (when the platform exposes it)
    /// plus a global counter refresh.
    fn collect(&self) {
        if let Some(bytes) = rss_bytes() {
            let cap = self.config.borrow().max_history_items;
            let sample = MetricSample {
                value: bytes as f64,
                at_ms: now_ms(),
                tags: Vec::new(),
            };
            // Already rate-limited by the collection interval; never sampled.
            self.store
                .borrow_mut()
                .record_sample("memory.rss_bytes", sample, cap);
        }
        self.update_global_counters();
    }
}

fn push_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

/// Resident set size in bytes, when the platform exposes it.
#[cfg(target_os = "linux")]
fn rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn rss_bytes() -> Option<u64> {
    None
}

/// Cancellation handle for periodic collection.
///
/// Host-pumped: the single-threaded model has no background timers, so the
/// host loop calls [`poll`](Self::poll) at its own cadence and the handle
/// decides when a pass is due.
pub struct CollectionHandle {
    system: Rc<ObservabilitySystem>,
    interval: Duration,
    last: Cell<Instant>,
    stopped: Cell<bool>,
}

impl CollectionHandle {
    /// Run a collection pass if the interval has elapsed. Returns whether
    /// a pass ran. A stopped handle never runs.
    pub fn poll(&self) -> bool {
        if self.stopped.get() || self.last.get().elapsed() < self.interval {
            return false;
        }
        self.collect_now();
        true
    }

    /// Force a collection pass now (no-op once stopped).
    pub fn collect_now(&self) {
        if self.stopped.get() {
            return;
        }
        self.system.collect();
        self.last.set(Instant::now());
    }

    /// Stop periodic collection. Idempotent.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}
