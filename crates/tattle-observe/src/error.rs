#![forbid(unsafe_code)]

//! Shared error type for the tattle workspace.
//!
//! Usage errors (cycle-creating dependency edges, re-entrant writes) are
//! returned synchronously to the caller. Failures inside user-supplied
//! callbacks never surface here; they are isolated at the invocation point
//! and recorded in the bounded error log instead.

/// Errors reported by the observability core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObserveError {
    /// A write reached a cell that was already mid-notification.
    #[error("re-entrant write to `{id}` rejected while notifying subscribers")]
    ReentrantWrite {
        /// Registry id of the cell.
        id: String,
    },

    /// A declared dependency edge would close a cycle in the computed graph.
    #[error("dependency `{dep}` would create a cycle back to `{cell}`")]
    DependencyCycle {
        /// Registry id of the computed's own cell.
        cell: String,
        /// Registry id of the offending dependency.
        dep: String,
    },

    /// A compute function returned an error.
    #[error("compute `{name}` failed: {message}")]
    ComputeFailed {
        /// Diagnostic name of the computed.
        name: String,
        /// Stringified source error.
        message: String,
    },

    /// A registered component could not produce its render stats.
    #[error("render stats unavailable for `{id}`: {message}")]
    StatsUnavailable {
        /// Registry id of the component.
        id: String,
        /// Reason supplied by the component.
        message: String,
    },
}

/// Workspace result alias.
pub type Result<T> = std::result::Result<T, ObserveError>;
