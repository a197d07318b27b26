#![forbid(unsafe_code)]

//! Property tests for the bounded store and configuration clamping.

use proptest::prelude::*;

use tattle_observe::store::{ErrorRecord, MetricSample, MetricsStore, PerformanceIssue};
use tattle_observe::{ConfigPatch, ObserveConfig, MIN_BOUNDED_CAP};

fn sample(value: f64) -> MetricSample {
    MetricSample {
        value,
        at_ms: 0,
        tags: Vec::new(),
    }
}

proptest! {
    /// A series never exceeds its cap, and when full it holds the newest
    /// samples in arrival order.
    #[test]
    fn series_is_bounded_and_keeps_newest(
        cap in MIN_BOUNDED_CAP..64usize,
        count in 0..200usize,
    ) {
        let mut store = MetricsStore::new();
        for i in 0..count {
            store.record_sample("m", sample(i as f64), cap);
        }
        match store.series("m") {
            None => prop_assert_eq!(count, 0),
            Some(series) => {
                prop_assert!(series.len() <= cap);
                prop_assert_eq!(series.len(), count.min(cap));
                let oldest = count.saturating_sub(cap);
                for (offset, s) in series.iter().enumerate() {
                    prop_assert_eq!(s.value, (oldest + offset) as f64);
                }
            }
        }
    }

    /// Cumulative totals count every report even after eviction.
    #[test]
    fn totals_survive_eviction(
        cap in MIN_BOUNDED_CAP..32usize,
        issues in 0..100u64,
        errors in 0..100u64,
    ) {
        let mut store = MetricsStore::new();
        for i in 0..issues {
            store.record_issue(
                PerformanceIssue {
                    kind: "k".into(),
                    entity: format!("obs-{i}"),
                    detail: String::new(),
                    at_ms: 0,
                },
                cap,
            );
        }
        for i in 0..errors {
            store.record_error(
                ErrorRecord {
                    kind: "k".into(),
                    message: format!("e{i}"),
                    context: String::new(),
                    at_ms: 0,
                },
                cap,
            );
        }
        prop_assert_eq!(store.issue_total(), issues);
        prop_assert_eq!(store.error_total(), errors);
        prop_assert!(store.issues().len() as u64 <= issues.min(cap as u64));
        prop_assert!(store.errors().len() <= cap);
    }

    /// The applied sampling rate is always inside [0, 1] and the caps
    /// never fall below the floor, whatever the patch carries.
    #[test]
    fn patched_config_is_always_valid(
        rate in prop::num::f64::ANY,
        history in 0..10_000usize,
        issues in 0..10_000usize,
        errors in 0..10_000usize,
    ) {
        let mut config = ObserveConfig::default();
        config.apply(
            ConfigPatch::default()
                .with_sampling_rate(rate)
                .with_max_history_items(history)
                .with_max_issues(issues)
                .with_max_errors(errors),
        );
        prop_assert!((0.0..=1.0).contains(&config.sampling_rate));
        prop_assert!(config.max_history_items >= MIN_BOUNDED_CAP);
        prop_assert!(config.max_issues >= MIN_BOUNDED_CAP);
        prop_assert!(config.max_errors >= MIN_BOUNDED_CAP);
    }

    /// Reset returns the store to its pristine state.
    #[test]
    fn reset_restores_default(count in 0..50usize) {
        let mut store = MetricsStore::new();
        for i in 0..count {
            store.record_sample("m", sample(i as f64), 16);
        }
        store.reset();
        prop_assert!(store.series("m").is_none());
        prop_assert_eq!(store.issue_total(), 0);
        prop_assert_eq!(store.error_total(), 0);
    }
}
