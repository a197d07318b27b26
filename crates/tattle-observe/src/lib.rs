#![forbid(unsafe_code)]

//! Instrumentation core: bounded metric storage, entity registry,
//! hotspot ranking, and the [`ObservabilitySystem`] façade.
//!
//! This crate knows nothing about reactive cells themselves; it sees them
//! only through the [`ObservedCell`] and [`RenderTracked`] traits, which
//! the reactive layer implements. Everything here is single-threaded:
//! handles are `!Send`/`!Sync` by construction and a multi-threaded host
//! runs one system per thread.

pub mod config;
pub mod error;
pub mod hotspots;
pub mod policy;
pub mod registry;
pub mod store;
pub mod system;

pub use config::{ConfigPatch, ObserveConfig, MIN_BOUNDED_CAP};
pub use error::{ObserveError, Result};
pub use hotspots::{CellHotspot, ComponentHotspot, HotspotReport};
pub use registry::{CellStats, ObservedCell, RenderStats, RenderTracked};
pub use store::{ErrorRecord, GlobalCounters, IssueReport, MetricSample, PerformanceIssue};
pub use system::{
    now_ms, CollectionHandle, DetailedSnapshot, GlobalSnapshot, MetricsSnapshot,
    ObservabilitySystem,
};
