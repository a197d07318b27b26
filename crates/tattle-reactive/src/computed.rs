#![forbid(unsafe_code)]

//! `Computed<T>`: a derived cell recomputed from its declared
//! dependencies.
//!
//! A computed owns an output [`Observable`] holding `Option<T>` (`None`
//! until the first successful compute) and a watch subscription on each
//! dependency. Eager computeds recompute on every dependency change;
//! lazy ones mark themselves dirty and recompute on the next read.
//!
//! Dependency edges are recorded in the registry and checked for cycles
//! at construction. Compute failures on the dependency path are recorded
//! and swallowed so one bad derivation cannot break the graph; a direct
//! [`recompute`](Computed::recompute) propagates the error to the
//! caller.

use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use web_time::Instant;

use tattle_observe::policy::SLOW_COMPUTE_MS;
use tattle_observe::{CellStats, IssueReport, ObservabilitySystem, ObserveError};

use crate::identity::Identity;
use crate::observable::{panic_message, Observable, Subscription};

/// A dependency a [`Computed`] can watch. Implemented by [`Observable`]
/// and by [`Computed`] itself, so derivations chain.
pub trait Subscribable {
    /// Registry id of the underlying cell.
    fn cell_id(&self) -> String;

    /// Invoke `on_change` after every effective change.
    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription;
}

impl<T: Identity + Clone + fmt::Debug + 'static> Subscribable for Observable<T> {
    fn cell_id(&self) -> String {
        self.id()
    }

    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| on_change())
    }
}

impl<T: Identity + Clone + fmt::Debug + 'static> Subscribable for Computed<T> {
    fn cell_id(&self) -> String {
        self.id()
    }

    fn watch(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.driver.cell.subscribe(move |_| on_change())
    }
}

/// Construction options for [`Computed`].
#[derive(Debug, Clone, Default)]
pub struct ComputedOptions {
    /// Defer recomputation to the next read instead of recomputing on
    /// every dependency change.
    pub lazy: bool,
    /// Label for the output cell; defaults to its registry id.
    pub name: Option<String>,
}

impl ComputedOptions {
    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Result of a fallible compute function.
pub type ComputeResult<T> = Result<T, Box<dyn std::error::Error>>;

type ComputeFn<T> = Rc<dyn Fn() -> ComputeResult<T>>;

/// Counter snapshot of a [`Computed`].
#[derive(Debug, Clone)]
pub struct ComputedStats {
    pub name: String,
    /// Total compute runs, successful or not.
    pub computations: u64,
    pub last_compute_ms: f64,
    /// Running mean over all compute runs.
    pub avg_compute_ms: f64,
    pub errors: u64,
}

struct ComputedState<T> {
    compute: ComputeFn<T>,
    lazy: bool,
    dirty: bool,
    disposed: bool,
    guards: Vec<Subscription>,
    computations: u64,
    last_compute_ms: f64,
    mean_compute_ms: f64,
    errors: u64,
}

struct Driver<T> {
    cell: Observable<Option<T>>,
    state: RefCell<ComputedState<T>>,
    system: Rc<ObservabilitySystem>,
    name: String,
    dep_count: usize,
}

/// A derived reactive cell.
pub struct Computed<T> {
    driver: Rc<Driver<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            driver: Rc::clone(&self.driver),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.driver.state.borrow();
        f.debug_struct("Computed")
            .field("name", &self.driver.name)
            .field("lazy", &state.lazy)
            .field("dirty", &state.dirty)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl<T: Identity + Clone + fmt::Debug + 'static> Computed<T> {
    /// Eagerly computed cell on the shared system.
    pub fn new(
        deps: &[&dyn Subscribable],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Self, ObserveError> {
        Self::with_system(
            deps,
            compute,
            ComputedOptions::default(),
            ObservabilitySystem::shared(),
        )
    }

    /// Cell whose compute may fail. The error message is recorded; a
    /// failed compute leaves the previous value in place.
    pub fn new_fallible(
        deps: &[&dyn Subscribable],
        compute: impl Fn() -> ComputeResult<T> + 'static,
    ) -> Result<Self, ObserveError> {
        Self::build(
            deps,
            Rc::new(compute),
            ComputedOptions::default(),
            ObservabilitySystem::shared(),
        )
    }

    /// Full form: explicit options and system.
    pub fn with_system(
        deps: &[&dyn Subscribable],
        compute: impl Fn() -> T + 'static,
        options: ComputedOptions,
        system: Rc<ObservabilitySystem>,
    ) -> Result<Self, ObserveError> {
        Self::build(deps, Rc::new(move || Ok(compute())), options, system)
    }

    /// Full fallible form.
    pub fn fallible_with_system(
        deps: &[&dyn Subscribable],
        compute: impl Fn() -> ComputeResult<T> + 'static,
        options: ComputedOptions,
        system: Rc<ObservabilitySystem>,
    ) -> Result<Self, ObserveError> {
        Self::build(deps, Rc::new(compute), options, system)
    }

    fn build(
        deps: &[&dyn Subscribable],
        compute: ComputeFn<T>,
        options: ComputedOptions,
        system: Rc<ObservabilitySystem>,
    ) -> Result<Self, ObserveError> {
        let cell: Observable<Option<T>> = match &options.name {
            Some(name) => Observable::labeled_in(None, name.clone(), Rc::clone(&system)),
            None => Observable::with_system(None, Rc::clone(&system)),
        };
        let id = cell.id();
        let dep_ids: Vec<String> = deps.iter().map(|dep| dep.cell_id()).collect();
        for dep in &dep_ids {
            if system.would_create_cycle(&id, dep) {
                return Err(ObserveError::DependencyCycle {
                    cell: id,
                    dep: dep.clone(),
                });
            }
        }
        system.record_edges(&id, &dep_ids);

        let name = options.name.unwrap_or_else(|| id.clone());
        let driver = Rc::new(Driver {
            cell,
            state: RefCell::new(ComputedState {
                compute,
                lazy: options.lazy,
                dirty: true,
                disposed: false,
                guards: Vec::new(),
                computations: 0,
                last_compute_ms: 0.0,
                mean_compute_ms: 0.0,
                errors: 0,
            }),
            system,
            name,
            dep_count: dep_ids.len(),
        });

        // Dependencies hold this callback for as long as they live; the
        // weak link keeps a dropped computed collectable.
        let weak = Rc::downgrade(&driver);
        let on_change: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(driver) = weak.upgrade() {
                driver.dependency_changed();
            }
        });
        let guards: Vec<Subscription> = deps
            .iter()
            .map(|dep| dep.watch(Rc::clone(&on_change)))
            .collect();
        driver.state.borrow_mut().guards = guards;

        let lazy = driver.state.borrow().lazy;
        if !lazy {
            // Construction failures are recorded, not propagated; the
            // cell starts at None and the caller can recompute directly
            // to see the error.
            let _ = driver.run();
        }
        Ok(Self { driver })
    }

    /// Registry id of the output cell (`obs-N`).
    #[must_use]
    pub fn id(&self) -> String {
        self.driver.cell.id()
    }

    /// Label of the output cell.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.driver.name
    }

    /// Current value; `None` before the first successful compute. A
    /// dirty lazy cell recomputes first. Counts a read on the output
    /// cell.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        let recompute = {
            let state = self.driver.state.borrow();
            state.lazy && state.dirty && !state.disposed
        };
        if recompute {
            let _ = self.driver.run();
        }
        self.driver.cell.get()
    }

    /// Recompute now and return the fresh value. Unlike the dependency
    /// path, failures propagate to the caller.
    pub fn recompute(&self) -> Result<T, ObserveError> {
        self.driver.run()
    }

    /// Whether a dependency changed since the last compute.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.driver.state.borrow().dirty
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.driver.state.borrow().disposed
    }

    /// Stop watching dependencies and drop the recorded edges. The last
    /// value stays readable. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.driver.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.guards.clear();
        }
        self.driver.system.remove_edges(&self.id());
    }

    /// Subscribe to the output cell.
    pub fn subscribe(&self, f: impl Fn(&Option<T>) + 'static) -> Subscription {
        self.driver.cell.subscribe(f)
    }

    /// Compute counters for this derivation.
    #[must_use]
    pub fn metrics(&self) -> ComputedStats {
        let state = self.driver.state.borrow();
        ComputedStats {
            name: self.driver.name.clone(),
            computations: state.computations,
            last_compute_ms: state.last_compute_ms,
            avg_compute_ms: state.mean_compute_ms,
            errors: state.errors,
        }
    }

    /// Instrumentation counters of the backing output cell.
    #[must_use]
    pub fn cell_metrics(&self) -> CellStats {
        self.driver.cell.metrics()
    }
}

impl<T: Identity + Clone + fmt::Debug + 'static> Driver<T> {
    fn dependency_changed(&self) {
        let lazy = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.dirty = true;
            state.lazy
        };
        if !lazy {
            // Recorded inside run; the graph keeps flowing.
            let _ = self.run();
        }
    }

    fn run(&self) -> Result<T, ObserveError> {
        let compute = {
            let state = self.state.borrow();
            if state.disposed {
                return Err(ObserveError::ComputeFailed {
                    name: self.name.clone(),
                    message: "computed cell is disposed".into(),
                });
            }
            Rc::clone(&state.compute)
        };
        let id = self.cell.id();
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| compute()));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        {
            let mut state = self.state.borrow_mut();
            state.computations += 1;
            state.last_compute_ms = elapsed_ms;
            let n = state.computations as f64;
            state.mean_compute_ms += (elapsed_ms - state.mean_compute_ms) / n;
        }
        self.system
            .record_metric("computed.compute_ms", elapsed_ms, &[("cell", &id)]);
        if elapsed_ms > SLOW_COMPUTE_MS {
            self.system.report_performance_issue(IssueReport {
                kind: "slow_compute".into(),
                entity: id.clone(),
                detail: format!("{elapsed_ms:.1}ms in {}", self.name),
            });
        }
        match outcome {
            Ok(Ok(value)) => {
                self.state.borrow_mut().dirty = false;
                if let Err(err) = self.cell.write(Some(value.clone())) {
                    self.system.record_error("compute_write", &err, &id);
                    return Err(err);
                }
                Ok(value)
            }
            Ok(Err(source)) => Err(self.fail("compute_failed", source.to_string(), &id)),
            Err(panic) => Err(self.fail("compute_panic", panic_message(panic.as_ref()), &id)),
        }
    }

    fn fail(&self, kind: &str, message: String, id: &str) -> ObserveError {
        self.state.borrow_mut().errors += 1;
        tracing::debug!(
            target: "tattle",
            name = %self.name,
            deps = self.dep_count,
            %message,
            "compute failed"
        );
        self.system.record_error(kind, &message, id);
        ObserveError::ComputeFailed {
            name: self.name.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tattle_observe::ObserveConfig;

    fn system() -> Rc<ObservabilitySystem> {
        Rc::new(ObservabilitySystem::new(ObserveConfig::default()))
    }

    // =========================================================================
    // Derivation
    // =========================================================================

    #[test]
    fn eager_computed_tracks_its_dependencies() {
        let system = system();
        let a = Observable::with_system(2i64, Rc::clone(&system));
        let b = Observable::with_system(3i64, Rc::clone(&system));
        let (ra, rb) = (a.clone(), b.clone());
        let sum = Computed::with_system(
            &[&a, &b],
            move || ra.get() + rb.get(),
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("construct");

        assert_eq!(sum.get(), Some(5));
        a.write(10).expect("write");
        assert_eq!(sum.get(), Some(13));
        b.write(-3).expect("write");
        assert_eq!(sum.get(), Some(7));
    }

    #[test]
    fn computed_chains_through_another_computed() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        let rb = base.clone();
        let doubled = Computed::with_system(
            &[&base],
            move || rb.get() * 2,
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("doubled");
        let rd = doubled.clone();
        let plus_one = Computed::with_system(
            &[&doubled],
            move || rd.get().unwrap_or(0) + 1,
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("plus_one");

        assert_eq!(plus_one.get(), Some(3));
        base.write(5).expect("write");
        assert_eq!(plus_one.get(), Some(11));
    }

    #[test]
    fn lazy_computed_defers_until_read() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        let runs = Rc::new(Cell::new(0u32));
        let (rb, rr) = (base.clone(), Rc::clone(&runs));
        let lazy = Computed::with_system(
            &[&base],
            move || {
                rr.set(rr.get() + 1);
                rb.get() * 10
            },
            ComputedOptions::default().with_lazy(true),
            Rc::clone(&system),
        )
        .expect("construct");

        assert_eq!(runs.get(), 0);
        base.write(2).expect("write");
        base.write(3).expect("write");
        assert_eq!(runs.get(), 0);
        assert_eq!(lazy.get(), Some(30));
        assert_eq!(runs.get(), 1);
        // Clean: a second read does not recompute.
        assert_eq!(lazy.get(), Some(30));
        assert_eq!(runs.get(), 1);
        assert!(!lazy.is_dirty());
    }

    #[test]
    fn unchanged_result_does_not_notify_downstream() {
        let system = system();
        let base = Observable::with_system(5i64, Rc::clone(&system));
        let rb = base.clone();
        let parity = Computed::with_system(
            &[&base],
            move || rb.get() % 2,
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("parity");
        let fired = Rc::new(Cell::new(0u32));
        let seen = Rc::clone(&fired);
        let _sub = parity.subscribe(move |_| seen.set(seen.get() + 1));

        base.write(7).expect("write");
        assert_eq!(fired.get(), 0);
        base.write(8).expect("write");
        assert_eq!(fired.get(), 1);
    }

    // =========================================================================
    // Failure paths
    // =========================================================================

    #[test]
    fn failed_compute_keeps_previous_value_and_records_error() {
        let system = system();
        let base = Observable::with_system(4i64, Rc::clone(&system));
        let rb = base.clone();
        let safe_sqrt = Computed::fallible_with_system(
            &[&base],
            move || {
                let v = rb.get();
                if v < 0 {
                    Err(format!("negative input {v}").into())
                } else {
                    Ok((v as f64).sqrt())
                }
            },
            ComputedOptions::default().with_name("safe_sqrt"),
            Rc::clone(&system),
        )
        .expect("construct");

        assert_eq!(safe_sqrt.get(), Some(2.0));
        base.write(-1).expect("write");
        // Dependency-path failure is swallowed; the old value survives.
        assert_eq!(safe_sqrt.get(), Some(2.0));
        let errors = system
            .get_metrics(true)
            .detailed
            .expect("detailed")
            .errors;
        assert!(errors.iter().any(|e| e.kind == "compute_failed"
            && e.message.contains("negative input -1")));
        let stats = safe_sqrt.metrics();
        assert_eq!(stats.name, "safe_sqrt");
        assert_eq!(stats.computations, 2);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn direct_recompute_propagates_the_failure() {
        let system = system();
        let base = Observable::with_system(-2i64, Rc::clone(&system));
        let rb = base.clone();
        let c = Computed::fallible_with_system(
            &[&base],
            move || {
                let v = rb.get();
                if v < 0 { Err("negative".into()) } else { Ok(v) }
            },
            ComputedOptions::default().with_name("guarded"),
            Rc::clone(&system),
        )
        .expect("construct");

        // Construction swallowed the failure; the cell is still None.
        assert_eq!(c.get(), None);
        match c.recompute() {
            Err(ObserveError::ComputeFailed { name, message }) => {
                assert_eq!(name, "guarded");
                assert_eq!(message, "negative");
            }
            other => panic!("expected ComputeFailed, got {other:?}"),
        }
        base.write(6).expect("write");
        assert_eq!(c.recompute().expect("recompute"), 6);
    }

    #[test]
    fn panicking_compute_is_caught() {
        let system = system();
        let base = Observable::with_system(0i64, Rc::clone(&system));
        let rb = base.clone();
        let c = Computed::with_system(
            &[&base],
            move || {
                if rb.get() > 0 {
                    panic!("bad state");
                }
                rb.get()
            },
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("construct");

        assert_eq!(c.get(), Some(0));
        base.write(1).expect("write");
        assert_eq!(c.get(), Some(0));
        let errors = system
            .get_metrics(true)
            .detailed
            .expect("detailed")
            .errors;
        assert!(errors
            .iter()
            .any(|e| e.kind == "compute_panic" && e.message == "bad state"));
    }

    // =========================================================================
    // Dispose
    // =========================================================================

    #[test]
    fn dispose_stops_tracking_and_is_idempotent() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        let rb = base.clone();
        let c = Computed::with_system(
            &[&base],
            move || rb.get() * 2,
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("construct");

        assert_eq!(c.get(), Some(2));
        c.dispose();
        c.dispose();
        assert!(c.is_disposed());
        assert_eq!(base.subscriber_count(), 0);
        base.write(50).expect("write");
        // Last value stays readable; nothing recomputes.
        assert_eq!(c.get(), Some(2));
        assert!(matches!(
            c.recompute(),
            Err(ObserveError::ComputeFailed { .. })
        ));
    }

    #[test]
    fn dropping_all_handles_releases_dependency_watches() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        {
            let rb = base.clone();
            let _c = Computed::with_system(
                &[&base],
                move || rb.get(),
                ComputedOptions::default(),
                Rc::clone(&system),
            )
            .expect("construct");
            assert_eq!(base.subscriber_count(), 1);
        }
        assert_eq!(base.subscriber_count(), 0);
    }

    // =========================================================================
    // Registry integration
    // =========================================================================

    #[test]
    fn edges_are_recorded_and_cycles_rejected() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        let rb = base.clone();
        let c = Computed::with_system(
            &[&base],
            move || rb.get(),
            ComputedOptions::default(),
            Rc::clone(&system),
        )
        .expect("construct");

        // Construction recorded c → base, so the reverse edge would
        // close a loop.
        assert!(system.would_create_cycle(&base.id(), &c.id()));
        // A self-edge is always a cycle.
        assert!(system.would_create_cycle(&c.id(), &c.id()));
        // An unrelated dependency is fine.
        let other = Observable::with_system(0i64, Rc::clone(&system));
        assert!(!system.would_create_cycle(&c.id(), &other.id()));
    }

    #[test]
    fn named_computed_labels_its_output_cell() {
        let system = system();
        let base = Observable::with_system(1i64, Rc::clone(&system));
        let rb = base.clone();
        let c = Computed::with_system(
            &[&base],
            move || rb.get(),
            ComputedOptions::default().with_name("derived.total"),
            Rc::clone(&system),
        )
        .expect("construct");
        assert_eq!(c.name(), "derived.total");
        assert_eq!(c.metrics().name, "derived.total");
        assert_eq!(c.cell_metrics().label, "derived.total");
    }
}
