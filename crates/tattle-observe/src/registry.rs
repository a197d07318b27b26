#![forbid(unsafe_code)]

//! Non-owning registry of live reactive cells and render-tracked components.
//!
//! The registry holds only `Weak` references: registering an entity never
//! extends its lifetime, and dead entries are swept before every
//! aggregation pass so short-lived cells cannot accumulate.
//!
//! It also records the declared dependency edges of computed cells, which
//! back the cycle check performed at computed construction time.

use std::collections::BTreeMap;
use std::rc::Weak;

use serde::Serialize;

use crate::error::ObserveError;

/// Counter snapshot of a reactive cell.
#[derive(Debug, Clone, Serialize)]
pub struct CellStats {
    /// Registry id (`obs-N`).
    pub id: String,
    /// Caller-supplied label.
    pub label: String,
    /// Truncated `Debug` rendering of the current value.
    pub value_preview: String,
    pub reads: u64,
    pub writes: u64,
    /// Cumulative subscriptions created over the cell's lifetime.
    pub subscriptions: u64,
    /// Running mean of notification time in milliseconds.
    pub update_time_ms: f64,
    /// Epoch milliseconds of the most recent access.
    pub last_access_ms: u64,
}

/// Counter snapshot of a render-tracked component.
#[derive(Debug, Clone, Serialize)]
pub struct RenderStats {
    /// Caller-supplied label.
    pub label: String,
    pub renders: u64,
    /// Cumulative render time in milliseconds.
    pub total_render_ms: f64,
    /// Duration of the most recent render in milliseconds.
    pub last_render_ms: f64,
    /// Renders that exceeded the slow-render threshold.
    pub slow_renders: u64,
}

/// A reactive cell the registry can aggregate over.
pub trait ObservedCell {
    /// Counter snapshot. Infallible: a live cell always has counters.
    fn stats(&self) -> CellStats;
    /// Zero the counters (metrics reset path).
    fn reset_stats(&self);
}

/// A UI-layer component the registry can aggregate over.
///
/// The observability core never touches rendering APIs; it only consumes
/// this snapshot interface.
pub trait RenderTracked {
    /// Counter snapshot. Fallible so a misbehaving component can be
    /// isolated and skipped during aggregation.
    fn render_stats(&self) -> Result<RenderStats, ObserveError>;
    /// Zero the counters (metrics reset path).
    fn reset_stats(&self);
}

/// Weak id → entity maps plus the computed dependency graph.
#[derive(Default)]
pub(crate) struct Registry {
    next_cell: u64,
    next_component: u64,
    cells: BTreeMap<String, Weak<dyn ObservedCell>>,
    components: BTreeMap<String, Weak<dyn RenderTracked>>,
    /// cell id → ids of the cells it reads from.
    edges: BTreeMap<String, Vec<String>>,
}

impl Registry {
    /// Assign a fresh `obs-N` id and store the weak association.
    pub(crate) fn register_cell(&mut self, cell: Weak<dyn ObservedCell>) -> String {
        self.next_cell += 1;
        let id = format!("obs-{}", self.next_cell);
        self.cells.insert(id.clone(), cell);
        id
    }

    /// Assign a fresh `cmp-N` id and store the weak association.
    pub(crate) fn register_component(&mut self, component: Weak<dyn RenderTracked>) -> String {
        self.next_component += 1;
        let id = format!("cmp-{}", self.next_component);
        self.components.insert(id.clone(), component);
        id
    }

    /// Drop entries whose entity has been deallocated, along with the
    /// dependency edges of dead cells. Returns how many were removed.
    pub(crate) fn sweep(&mut self) -> usize {
        let before = self.cells.len() + self.components.len();
        self.cells.retain(|_, weak| weak.strong_count() > 0);
        self.components.retain(|_, weak| weak.strong_count() > 0);
        let cells = &self.cells;
        self.edges.retain(|id, _| cells.contains_key(id));
        before - self.cells.len() - self.components.len()
    }

    /// Upgrade every live cell, oldest id first.
    pub(crate) fn live_cells(&self) -> Vec<(String, std::rc::Rc<dyn ObservedCell>)> {
        self.cells
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|cell| (id.clone(), cell)))
            .collect()
    }

    /// Upgrade every live component, oldest id first.
    pub(crate) fn live_components(&self) -> Vec<(String, std::rc::Rc<dyn RenderTracked>)> {
        self.components
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|c| (id.clone(), c)))
            .collect()
    }

    /// Whether a cell id is currently registered and alive.
    pub(crate) fn cell_is_live(&self, id: &str) -> bool {
        self.cells
            .get(id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Record the declared dependencies of a computed cell.
    pub(crate) fn record_edges(&mut self, id: &str, deps: Vec<String>) {
        self.edges.insert(id.to_string(), deps);
    }

    /// Drop the dependencies of a disposed computed cell.
    pub(crate) fn remove_edges(&mut self, id: &str) {
        self.edges.remove(id);
    }

    /// Would adding the edge `cell → dep` close a cycle?
    ///
    /// True when `dep` already reaches `cell` through recorded edges
    /// (including the degenerate `dep == cell` self-edge).
    pub(crate) fn would_cycle(&self, cell: &str, dep: &str) -> bool {
        if cell == dep {
            return true;
        }
        let mut stack = vec![dep];
        let mut visited = std::collections::BTreeSet::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = self.edges.get(node) {
                for n in next {
                    if n == cell {
                        return true;
                    }
                    stack.push(n);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeCell {
        label: String,
        reads: Cell<u64>,
    }

    impl ObservedCell for FakeCell {
        fn stats(&self) -> CellStats {
            CellStats {
                id: String::new(),
                label: self.label.clone(),
                value_preview: String::new(),
                reads: self.reads.get(),
                writes: 0,
                subscriptions: 0,
                update_time_ms: 0.0,
                last_access_ms: 0,
            }
        }

        fn reset_stats(&self) {
            self.reads.set(0);
        }
    }

    fn fake(label: &str) -> Rc<dyn ObservedCell> {
        Rc::new(FakeCell {
            label: label.to_string(),
            reads: Cell::new(0),
        })
    }

    #[test]
    fn ids_are_monotonic_and_kind_prefixed() {
        let mut registry = Registry::default();
        let a = fake("a");
        let b = fake("b");
        assert_eq!(registry.register_cell(Rc::downgrade(&a)), "obs-1");
        assert_eq!(registry.register_cell(Rc::downgrade(&b)), "obs-2");
    }

    #[test]
    fn sweep_drops_dead_entries_and_their_edges() {
        let mut registry = Registry::default();
        let a = fake("a");
        let id_a = registry.register_cell(Rc::downgrade(&a));
        let id_b = {
            let b = fake("b");
            let id = registry.register_cell(Rc::downgrade(&b));
            registry.record_edges(&id, vec![id_a.clone()]);
            id
        };
        // b dropped at end of scope
        assert_eq!(registry.sweep(), 1);
        assert!(registry.cell_is_live(&id_a));
        assert!(!registry.cell_is_live(&id_b));
        assert!(!registry.would_cycle(&id_a, &id_b));
        assert_eq!(registry.live_cells().len(), 1);
    }

    #[test]
    fn registration_does_not_extend_lifetime() {
        let mut registry = Registry::default();
        let weak = {
            let a = fake("a");
            let weak = Rc::downgrade(&a);
            registry.register_cell(weak.clone());
            weak
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let registry = Registry::default();
        assert!(registry.would_cycle("obs-1", "obs-1"));
    }

    #[test]
    fn transitive_cycle_detected() {
        let mut registry = Registry::default();
        // obs-2 reads obs-1, obs-3 reads obs-2.
        registry.record_edges("obs-2", vec!["obs-1".into()]);
        registry.record_edges("obs-3", vec!["obs-2".into()]);
        // An edge obs-1 → obs-3 would close the loop.
        assert!(registry.would_cycle("obs-1", "obs-3"));
        // The reverse direction is fine.
        assert!(!registry.would_cycle("obs-3", "obs-1"));
    }
}
