#![forbid(unsafe_code)]

//! `Observable<T>`: a mutable reactive cell with transparent
//! instrumentation.
//!
//! Every cell registers with an [`ObservabilitySystem`] at construction
//! and counts its own reads, writes, subscriptions, and notification
//! time. Cloning a handle shares the underlying cell; the last handle to
//! drop releases it, at which point the registry sweeps the entry.
//!
//! # Invariants
//!
//! 1. A write counts as a write even when the value is unchanged.
//! 2. Subscribers run only when the new value is not [`Identity::same`]
//!    as the old one.
//! 3. A panicking subscriber is caught and recorded; later subscribers
//!    still run.
//! 4. A write issued from inside a subscriber is rejected with
//!    [`ObserveError::ReentrantWrite`], never queued.

use std::cell::{BorrowError, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use web_time::Instant;

use tattle_observe::{
    now_ms, CellStats, IssueReport, ObservabilitySystem, ObserveError, ObservedCell,
};

use crate::identity::Identity;

/// Shared mutable callback slot, as accepted by
/// [`Observable::subscribe_shared`].
pub type SharedCallback<T> = Rc<dyn Fn(&T)>;

/// Access kind recorded in the detailed-mode history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One access to a cell, kept only in detailed mode.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub at_ms: u64,
    /// `file:line` of the call site.
    pub caller: String,
}

struct SubEntry<T> {
    id: u64,
    callback: SharedCallback<T>,
}

pub(crate) struct ObservableInner<T> {
    pub(crate) id: String,
    pub(crate) label: String,
    pub(crate) value: T,
    subscribers: Vec<SubEntry<T>>,
    next_sub: u64,
    notifying: bool,
    reads: u64,
    writes: u64,
    /// Cumulative subscriptions created, not the live count.
    subscriptions: u64,
    /// Welford running mean of notification time, in milliseconds.
    mean_notify_ms: f64,
    notify_count: u64,
    last_access_ms: u64,
    access_log: VecDeque<AccessRecord>,
}

impl<T> ObservableInner<T> {
    fn log_access(&mut self, kind: AccessKind, caller: &std::panic::Location<'_>, cap: usize) {
        // The cap can shrink between inserts; drain down, not just one.
        while self.access_log.len() >= cap {
            self.access_log.pop_front();
        }
        self.access_log.push_back(AccessRecord {
            kind,
            at_ms: self.last_access_ms,
            caller: format!("{}:{}", caller.file(), caller.line()),
        });
    }
}

const PREVIEW_LEN: usize = 64;

impl<T: fmt::Debug> ObservableInner<T> {
    fn preview(&self) -> String {
        let mut s = format!("{:?}", self.value);
        if s.len() > PREVIEW_LEN {
            let mut cut = PREVIEW_LEN;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
            s.push('…');
        }
        s
    }
}

// Local wrapper so the registry trait can be implemented here; the
// trait lives in tattle-observe and `RefCell` is foreign.
pub(crate) struct CellCore<T> {
    state: RefCell<ObservableInner<T>>,
}

impl<T> CellCore<T> {
    fn new(inner: ObservableInner<T>) -> Self {
        Self {
            state: RefCell::new(inner),
        }
    }

    fn borrow(&self) -> Ref<'_, ObservableInner<T>> {
        self.state.borrow()
    }

    fn borrow_mut(&self) -> RefMut<'_, ObservableInner<T>> {
        self.state.borrow_mut()
    }

    fn try_borrow(&self) -> Result<Ref<'_, ObservableInner<T>>, BorrowError> {
        self.state.try_borrow()
    }
}

impl<T: fmt::Debug> ObservedCell for CellCore<T> {
    fn stats(&self) -> CellStats {
        let inner = self.borrow();
        CellStats {
            id: inner.id.clone(),
            label: inner.label.clone(),
            value_preview: inner.preview(),
            reads: inner.reads,
            writes: inner.writes,
            subscriptions: inner.subscriptions,
            update_time_ms: inner.mean_notify_ms,
            last_access_ms: inner.last_access_ms,
        }
    }

    fn reset_stats(&self) {
        let mut inner = self.borrow_mut();
        inner.reads = 0;
        inner.writes = 0;
        inner.subscriptions = 0;
        inner.mean_notify_ms = 0.0;
        inner.notify_count = 0;
        inner.access_log.clear();
    }
}

/// RAII subscription guard. Dropping it unsubscribes; call
/// [`detach`](Subscription::detach) to keep the subscription for the
/// cell's lifetime instead.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now, consuming the guard.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the subscription alive without holding the guard.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A mutable reactive cell holding a `T`.
pub struct Observable<T> {
    pub(crate) inner: Rc<CellCore<T>>,
    pub(crate) system: Rc<ObservabilitySystem>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            system: Rc::clone(&self.system),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("id", &inner.id)
            .field("label", &inner.label)
            .field("value", &inner.value)
            .finish()
    }
}

impl<T: Identity + Clone + fmt::Debug + 'static> Observable<T> {
    /// New cell registered with the thread-local shared system.
    pub fn new(value: T) -> Self {
        Self::build(value, None, ObservabilitySystem::shared())
    }

    /// New cell with a human-readable label, on the shared system.
    pub fn labeled(value: T, label: impl Into<String>) -> Self {
        Self::build(value, Some(label.into()), ObservabilitySystem::shared())
    }

    /// New cell registered with an explicit system.
    pub fn with_system(value: T, system: Rc<ObservabilitySystem>) -> Self {
        Self::build(value, None, system)
    }

    /// New labeled cell on an explicit system.
    pub fn labeled_in(
        value: T,
        label: impl Into<String>,
        system: Rc<ObservabilitySystem>,
    ) -> Self {
        Self::build(value, Some(label.into()), system)
    }

    fn build(value: T, label: Option<String>, system: Rc<ObservabilitySystem>) -> Self {
        let inner = Rc::new(CellCore::new(ObservableInner {
            id: String::new(),
            label: String::new(),
            value,
            subscribers: Vec::new(),
            next_sub: 0,
            notifying: false,
            reads: 0,
            writes: 0,
            subscriptions: 0,
            mean_notify_ms: 0.0,
            notify_count: 0,
            last_access_ms: now_ms(),
            access_log: VecDeque::new(),
        }));
        let as_cell: Rc<dyn ObservedCell> = inner.clone();
        let id = system.register_cell(Rc::downgrade(&as_cell));
        {
            let mut cell = inner.borrow_mut();
            cell.label = label.unwrap_or_else(|| id.clone());
            cell.id = id;
        }
        Self { inner, system }
    }

    /// Registry id of this cell (`obs-N`).
    #[must_use]
    pub fn id(&self) -> String {
        self.inner.borrow().id.clone()
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> String {
        self.inner.borrow().label.clone()
    }

    /// Read the current value. Counts the read; in detailed mode the
    /// call site is kept in the access history.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> T {
        let caller = std::panic::Location::caller();
        let config = self.system.config();
        let started = Instant::now();
        let (id, value) = {
            let mut inner = self.inner.borrow_mut();
            inner.reads += 1;
            inner.last_access_ms = now_ms();
            if config.detailed_mode {
                inner.log_access(AccessKind::Read, caller, config.max_history_items);
            }
            (inner.id.clone(), inner.value.clone())
        };
        self.system.record_metric(
            "observable.read_ms",
            started.elapsed().as_secs_f64() * 1e3,
            &[("cell", &id)],
        );
        value
    }

    /// Non-panicking read: `None` when the cell is borrowed by a
    /// conflicting access on this thread. Does not count as a read.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.inner.try_borrow().ok().map(|inner| inner.value.clone())
    }

    /// Write a new value.
    ///
    /// Returns `Ok(true)` when the value changed and subscribers were
    /// notified, `Ok(false)` when the new value was identical (the write
    /// still counts). A write from inside a subscriber of this cell is
    /// rejected with [`ObserveError::ReentrantWrite`].
    #[track_caller]
    pub fn write(&self, value: T) -> Result<bool, ObserveError> {
        let caller = std::panic::Location::caller();
        let config = self.system.config();
        let started = Instant::now();
        let (id, changed) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.id.clone();
            if inner.notifying {
                drop(inner);
                self.system.record_error(
                    "reentrant_write",
                    "write rejected while notifying subscribers",
                    &id,
                );
                return Err(ObserveError::ReentrantWrite { id });
            }
            inner.writes += 1;
            inner.last_access_ms = now_ms();
            if config.detailed_mode {
                inner.log_access(AccessKind::Write, caller, config.max_history_items);
            }
            let changed = !inner.value.same(&value);
            if changed {
                inner.value = value;
                inner.notifying = true;
            }
            (id, changed)
        };
        if changed {
            self.notify();
        }
        self.system.record_metric(
            "observable.write_ms",
            started.elapsed().as_secs_f64() * 1e3,
            &[("cell", &id)],
        );
        Ok(changed)
    }

    /// Replace the value without notifying and without touching the
    /// write counters. Initialization and reset paths.
    pub fn silent_set(&self, value: T) {
        self.inner.borrow_mut().value = value;
    }

    /// Run `f` on the current value and write the result back.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<bool, ObserveError> {
        let next = f(&self.inner.borrow().value);
        self.write(next)
    }

    // Notification path. The borrow is released before callbacks run so
    // subscribers can read this cell; `notifying` stays set so they
    // cannot write it.
    fn notify(&self) {
        let (id, snapshot, subs) = {
            let inner = self.inner.borrow();
            let subs: Vec<(u64, SharedCallback<T>)> = inner
                .subscribers
                .iter()
                .map(|entry| (entry.id, Rc::clone(&entry.callback)))
                .collect();
            (inner.id.clone(), inner.value.clone(), subs)
        };
        let started = Instant::now();
        for (_, callback) in &subs {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&snapshot)));
            if let Err(panic) = outcome {
                tracing::error!(target: "tattle", cell = %id, "subscriber panicked");
                self.system
                    .record_error("subscriber_panic", panic_message(panic.as_ref()), &id);
            }
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        {
            let mut inner = self.inner.borrow_mut();
            inner.notifying = false;
            inner.notify_count += 1;
            let n = inner.notify_count as f64;
            inner.mean_notify_ms += (elapsed_ms - inner.mean_notify_ms) / n;
        }
        self.system
            .record_metric("observable.notify_ms", elapsed_ms, &[("cell", &id)]);
        self.system
            .record_metric("observable.subscribers", subs.len() as f64, &[("cell", &id)]);
        if elapsed_ms > tattle_observe::policy::SLOW_COMPUTE_MS {
            self.system.report_performance_issue(IssueReport {
                kind: "slow_notify".into(),
                entity: id,
                detail: format!("{elapsed_ms:.1}ms across {} subscribers", subs.len()),
            });
        }
    }

    /// Subscribe to changes. The callback receives the new value after
    /// each effective write. Dropping the returned guard unsubscribes.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_shared(Rc::new(f))
    }

    /// Subscribe with a shared callback. Subscribing the same `Rc` twice
    /// is a no-op: the second guard aliases the first entry, and the
    /// first guard to drop removes it.
    pub fn subscribe_shared(&self, callback: SharedCallback<T>) -> Subscription {
        let sub_id = {
            let mut inner = self.inner.borrow_mut();
            let existing = inner
                .subscribers
                .iter()
                .find(|entry| Rc::ptr_eq(&entry.callback, &callback))
                .map(|entry| entry.id);
            match existing {
                Some(id) => id,
                None => {
                    let id = inner.next_sub;
                    inner.next_sub += 1;
                    inner.subscriptions += 1;
                    inner.subscribers.push(SubEntry { id, callback });
                    id
                }
            }
        };
        let weak: Weak<CellCore<T>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .borrow_mut()
                    .subscribers
                    .retain(|entry| entry.id != sub_id);
            }
        })
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Instrumentation counters for this cell.
    #[must_use]
    pub fn metrics(&self) -> CellStats {
        self.inner.stats()
    }

    /// Access history, oldest first. Empty outside detailed mode.
    #[must_use]
    pub fn history(&self) -> Vec<AccessRecord> {
        self.inner.borrow().access_log.iter().cloned().collect()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
