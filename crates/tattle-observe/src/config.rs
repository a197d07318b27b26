#![forbid(unsafe_code)]

//! Observability configuration: sampling, history caps, detailed mode.
//!
//! `configure` is patch-based: each recognized option is validated and
//! clamped independently, and re-applying a partial patch only changes the
//! supplied fields.

/// Minimum size for every bounded collection (series, issues, errors).
pub const MIN_BOUNDED_CAP: usize = 10;

/// Active configuration of an [`ObservabilitySystem`](crate::ObservabilitySystem).
#[derive(Debug, Clone)]
pub struct ObserveConfig {
    /// Enable history capture and verbose issue logging.
    /// Intended for development, not production. Default: false.
    pub detailed_mode: bool,
    /// Probability in [0, 1] that a given metric sample is recorded.
    /// The system's sole overhead-control lever. Default: 1.0.
    pub sampling_rate: f64,
    /// Cap on each metric series and per-cell history log. Default: 100.
    pub max_history_items: usize,
    /// Cap on the performance-issue log. Default: 50.
    pub max_issues: usize,
    /// Cap on the error log. Default: 50.
    pub max_errors: usize,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            detailed_mode: false,
            sampling_rate: 1.0,
            max_history_items: 100,
            max_issues: 50,
            max_errors: 50,
        }
    }
}

impl ObserveConfig {
    /// Apply a partial patch, clamping each supplied field.
    ///
    /// Sampling rate is clamped to [0, 1] (a NaN is ignored with a warning);
    /// every cap is floored at [`MIN_BOUNDED_CAP`].
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(detailed) = patch.detailed_mode {
            self.detailed_mode = detailed;
        }
        if let Some(rate) = patch.sampling_rate {
            if rate.is_nan() {
                tracing::warn!(target: "tattle", "ignoring NaN sampling rate");
            } else {
                self.sampling_rate = rate.clamp(0.0, 1.0);
            }
        }
        if let Some(cap) = patch.max_history_items {
            self.max_history_items = cap.max(MIN_BOUNDED_CAP);
        }
        if let Some(cap) = patch.max_issues {
            self.max_issues = cap.max(MIN_BOUNDED_CAP);
        }
        if let Some(cap) = patch.max_errors {
            self.max_errors = cap.max(MIN_BOUNDED_CAP);
        }
    }
}

/// Partial update for [`ObserveConfig`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub detailed_mode: Option<bool>,
    pub sampling_rate: Option<f64>,
    pub max_history_items: Option<usize>,
    pub max_issues: Option<usize>,
    pub max_errors: Option<usize>,
}

impl ConfigPatch {
    /// Toggle detailed mode.
    #[must_use]
    pub fn with_detailed_mode(mut self, enabled: bool) -> Self {
        self.detailed_mode = Some(enabled);
        self
    }

    /// Set the sampling rate (clamped on apply).
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = Some(rate);
        self
    }

    /// Set the series/history cap (floored on apply).
    #[must_use]
    pub fn with_max_history_items(mut self, cap: usize) -> Self {
        self.max_history_items = Some(cap);
        self
    }

    /// Set the issue-log cap (floored on apply).
    #[must_use]
    pub fn with_max_issues(mut self, cap: usize) -> Self {
        self.max_issues = Some(cap);
        self
    }

    /// Set the error-log cap (floored on apply).
    #[must_use]
    pub fn with_max_errors(mut self, cap: usize) -> Self {
        self.max_errors = Some(cap);
        self
    }
}
