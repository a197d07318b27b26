#![forbid(unsafe_code)]

//! Reactive cells with transparent instrumentation.
//!
//! [`Observable`] is a mutable cell; [`Computed`] derives a value from
//! other cells and recomputes when they change. Both register with an
//! [`ObservabilitySystem`](tattle_observe::ObservabilitySystem) so
//! reads, writes, notification time, and failures are counted without
//! any code at the call sites.
//!
//! Handles are `Rc`-based and single-threaded; clone a handle to share a
//! cell, drop the last handle to release it.

pub mod computed;
pub mod identity;
pub mod observable;

pub use computed::{ComputeResult, Computed, ComputedOptions, ComputedStats, Subscribable};
pub use identity::Identity;
pub use observable::{AccessKind, AccessRecord, Observable, SharedCallback, Subscription};
