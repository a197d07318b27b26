#![forbid(unsafe_code)]

//! Hotspot analysis: rank the busiest components and cells.
//!
//! A pure function over stat snapshots. Components are scored
//! `renders × average render time` and must clear both the render-count
//! floor and the slow-last-render threshold; cells are ranked by raw write
//! count above the write floor. All thresholds live in [`crate::policy`].

use serde::Serialize;

use crate::policy::{RENDER_COUNT_FLOOR, SLOW_RENDER_MS, TOP_N, WRITE_COUNT_FLOOR};
use crate::registry::{CellStats, RenderStats};

/// A component flagged as disproportionately costly.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHotspot {
    pub id: String,
    pub label: String,
    pub renders: u64,
    /// Cumulative render time divided by render count, in milliseconds.
    pub avg_render_ms: f64,
    /// `renders × avg_render_ms`; the sort key.
    pub score: f64,
}

/// A cell flagged by raw write volume.
#[derive(Debug, Clone, Serialize)]
pub struct CellHotspot {
    pub id: String,
    pub label: String,
    pub writes: u64,
}

/// Result of one hotspot pass, at most [`TOP_N`] entries per category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HotspotReport {
    pub components: Vec<ComponentHotspot>,
    pub cells: Vec<CellHotspot>,
}

/// Rank the given snapshots. Ties break on id so output is deterministic.
#[must_use]
pub fn rank(cells: &[(String, CellStats)], components: &[(String, RenderStats)]) -> HotspotReport {
    let mut flagged_components: Vec<ComponentHotspot> = components
        .iter()
        .filter(|(_, stats)| {
            stats.renders > RENDER_COUNT_FLOOR && stats.last_render_ms > SLOW_RENDER_MS
        })
        .map(|(id, stats)| {
            let avg_render_ms = stats.total_render_ms / stats.renders as f64;
            ComponentHotspot {
                id: id.clone(),
                label: stats.label.clone(),
                renders: stats.renders,
                avg_render_ms,
                score: stats.renders as f64 * avg_render_ms,
            }
        })
        .collect();
    flagged_components.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    flagged_components.truncate(TOP_N);

    let mut flagged_cells: Vec<CellHotspot> = cells
        .iter()
        .filter(|(_, stats)| stats.writes > WRITE_COUNT_FLOOR)
        .map(|(id, stats)| CellHotspot {
            id: id.clone(),
            label: stats.label.clone(),
            writes: stats.writes,
        })
        .collect();
    flagged_cells.sort_by(|a, b| b.writes.cmp(&a.writes).then_with(|| a.id.cmp(&b.id)));
    flagged_cells.truncate(TOP_N);

    HotspotReport {
        components: flagged_components,
        cells: flagged_cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: &str, writes: u64) -> (String, CellStats) {
        (
            id.to_string(),
            CellStats {
                id: id.to_string(),
                label: id.to_string(),
                value_preview: String::new(),
                reads: 0,
                writes,
                subscriptions: 0,
                update_time_ms: 0.0,
                last_access_ms: 0,
            },
        )
    }

    fn component(id: &str, renders: u64, total_ms: f64, last_ms: f64) -> (String, RenderStats) {
        (
            id.to_string(),
            RenderStats {
                label: id.to_string(),
                renders,
                total_render_ms: total_ms,
                last_render_ms: last_ms,
                slow_renders: 0,
            },
        )
    }

    #[test]
    fn floors_are_strict() {
        // Exactly at the floor is excluded in every dimension.
        let cells = vec![cell("obs-1", WRITE_COUNT_FLOOR)];
        let components = vec![
            component("cmp-1", RENDER_COUNT_FLOOR, 500.0, 50.0),
            component("cmp-2", 11, 500.0, SLOW_RENDER_MS),
        ];
        let report = rank(&cells, &components);
        assert!(report.cells.is_empty());
        assert!(report.components.is_empty());
    }

    #[test]
    fn components_sorted_by_score_descending() {
        let components = vec![
            // score = renders * (total / renders) = total
            component("cmp-1", 20, 400.0, 15.0),
            component("cmp-2", 50, 900.0, 12.0),
            component("cmp-3", 12, 600.0, 20.0),
        ];
        let report = rank(&[], &components);
        let ids: Vec<&str> = report.components.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["cmp-2", "cmp-3", "cmp-1"]);
        assert_eq!(report.components[0].score, 900.0);
    }

    #[test]
    fn cells_sorted_by_raw_writes_not_score() {
        let cells = vec![cell("obs-1", 30), cell("obs-2", 100), cell("obs-3", 21)];
        let report = rank(&cells, &[]);
        let ids: Vec<&str> = report.cells.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["obs-2", "obs-1", "obs-3"]);
    }

    #[test]
    fn at_most_top_n_per_category() {
        let cells: Vec<_> = (0..12).map(|i| cell(&format!("obs-{i}"), 21 + i)).collect();
        let components: Vec<_> = (0..8)
            .map(|i| component(&format!("cmp-{i}"), 20 + i, 300.0 + i as f64, 20.0))
            .collect();
        let report = rank(&cells, &components);
        assert_eq!(report.cells.len(), TOP_N);
        assert_eq!(report.components.len(), TOP_N);
    }

    #[test]
    fn avg_render_time_is_cumulative_over_count() {
        let components = vec![component("cmp-1", 20, 500.0, 25.0)];
        let report = rank(&[], &components);
        assert_eq!(report.components[0].avg_render_ms, 25.0);
        assert_eq!(report.components[0].score, 500.0);
    }

    #[test]
    fn ties_break_on_id() {
        let cells = vec![cell("obs-9", 40), cell("obs-2", 40)];
        let report = rank(&cells, &[]);
        assert_eq!(report.cells[0].id, "obs-2");
    }
}
