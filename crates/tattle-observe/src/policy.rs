#![forbid(unsafe_code)]

//! Fixed hotspot and slowness policy.
//!
//! These constants are deliberately not user-configurable; they define the
//! hotspot contract and every consumer (analyzer, issue reporting, tests)
//! reads them from here.

/// A component must exceed this many renders to qualify as a hotspot.
pub const RENDER_COUNT_FLOOR: u64 = 10;

/// A component's most recent render must exceed this (ms) to qualify.
pub const SLOW_RENDER_MS: f64 = 10.0;

/// A cell must exceed this many writes to qualify as a hotspot.
pub const WRITE_COUNT_FLOOR: u64 = 20;

/// Compute time (ms) above which a `slow_compute` issue is reported.
pub const SLOW_COMPUTE_MS: f64 = 10.0;

/// Maximum entries returned per hotspot category.
pub const TOP_N: usize = 5;
