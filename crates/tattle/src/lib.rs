#![forbid(unsafe_code)]

//! Reactive state with built-in observability.
//!
//! `tattle` bundles two layers behind one import:
//!
//! - [`tattle_reactive`]: [`Observable`] and [`Computed`] cells whose
//!   reads, writes, and recomputations are counted transparently.
//! - [`tattle_observe`]: the [`ObservabilitySystem`] those counters feed,
//!   with bounded metric storage, hotspot ranking, JSON snapshots, and
//!   Prometheus text exposition.
//!
//! # Quick start
//!
//! ```
//! use tattle::prelude::*;
//!
//! let score = Observable::labeled(0u32, "player.score");
//! let sub = score.subscribe(|v| println!("score is now {v}"));
//!
//! score.write(10).unwrap();
//!
//! let system = ObservabilitySystem::shared();
//! let snapshot = system.get_metrics(false);
//! assert!(snapshot.global.total_writes >= 1);
//! drop(sub);
//! ```
//!
//! Everything is single-threaded: cells and systems are `Rc`-based, and
//! a multi-threaded host runs one system per thread (the shared system
//! is thread-local).

pub use tattle_observe::{
    self as observe, CellHotspot, CellStats, CollectionHandle, ComponentHotspot, ConfigPatch,
    DetailedSnapshot, ErrorRecord, GlobalCounters, GlobalSnapshot, HotspotReport, IssueReport,
    MetricSample, MetricsSnapshot, ObservabilitySystem, ObserveConfig, ObserveError,
    PerformanceIssue, RenderStats, RenderTracked,
};
pub use tattle_reactive::{
    self as reactive, AccessKind, AccessRecord, ComputeResult, Computed, ComputedOptions,
    ComputedStats, Identity, Observable, SharedCallback, Subscribable, Subscription,
};

/// One-line import for the common surface.
pub mod prelude {
    pub use tattle_observe::{
        ConfigPatch, HotspotReport, MetricsSnapshot, ObservabilitySystem, ObserveConfig,
        ObserveError,
    };
    pub use tattle_reactive::{
        Computed, ComputedOptions, Identity, Observable, Subscribable, Subscription,
    };
}
