// src/input.rs

//! Live, subscribable value cells.
//!
//! An [`Input`] is the leaf an evaluation reads from: it holds the current
//! [`Output`] for some piece of external state, plus the set of subscribers
//! to poke when that state may have changed. Identity is stable across
//! re-evaluations (two clones of the same input are the same input), which
//! is how the engine recognises "same dependency as before".
//!
//! Notification contract:
//! - a refresh is delivered at least once after any mutation that happened
//!   before the subscription was in place
//! - duplicate refreshes are allowed and must be safe for the subscriber
//! - unsubscribing is idempotent; after `unsubscribe` returns the refresh
//!   callback is not invoked again

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::output::Output;

static NEXT_INPUT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stable identity of an input, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(u64);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input-{}", self.0)
    }
}

/// Identifier of the job that produced an input's current value, if any.
///
/// Job ids show up on analysis nodes so a renderer can link a node to its
/// log page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked when an input's underlying state may have changed.
pub type RefreshFn = Arc<dyn Fn() + Send + Sync>;

struct SubEntry {
    id: u64,
    /// Cleared by unsubscribe; checked immediately before each delivery.
    active: Arc<AtomicBool>,
    refresh: RefreshFn,
}

/// Hooks fired when the subscriber count crosses zero, used by monitors to
/// start and stop their drivers lazily.
pub(crate) struct ActivationHooks {
    pub on_first: Box<dyn Fn() + Send + Sync>,
    pub on_last: Box<dyn Fn() + Send + Sync>,
}

struct CellState<T> {
    output: Output<T>,
    job_id: Option<JobId>,
}

pub(crate) struct Cell<T> {
    id: InputId,
    label: String,
    /// Self-reference so subscriptions can hold a weak unsubscribe handle.
    weak_self: Weak<Cell<T>>,
    /// Bumped on every `set`; lets the engine detect a write that raced
    /// between evaluation and re-subscription.
    version: AtomicU64,
    state: Mutex<CellState<T>>,
    subs: Mutex<Vec<SubEntry>>,
    hooks: Mutex<Option<ActivationHooks>>,
}

/// Type-erased view of a cell, enough for dependency tracking.
pub(crate) trait AnySource: Send + Sync {
    fn id(&self) -> InputId;
    fn label(&self) -> String;
    fn version(&self) -> u64;
    fn subscribe_refresh(&self, refresh: RefreshFn) -> Subscription;
}

/// A live input cell. Cloning shares the underlying cell.
pub struct Input<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        Input {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> PartialEq for Input<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id == other.cell.id
    }
}

impl<T> Eq for Input<T> {}

impl<T> fmt::Debug for Input<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("id", &self.cell.id)
            .field("label", &self.cell.label)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Input<T> {
    pub fn new(label: impl Into<String>, initial: Output<T>) -> Self {
        let id = InputId(NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        Input {
            cell: Arc::new_cyclic(|weak_self| Cell {
                id,
                label,
                weak_self: weak_self.clone(),
                version: AtomicU64::new(0),
                state: Mutex::new(CellState {
                    output: initial,
                    job_id: None,
                }),
                subs: Mutex::new(Vec::new()),
                hooks: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> InputId {
        self.cell.id
    }

    pub fn label(&self) -> &str {
        &self.cell.label
    }

    /// Read the current output and attributed job without blocking.
    pub fn get(&self) -> (Output<T>, Option<JobId>) {
        let state = lock(&self.cell.state);
        (state.output.clone(), state.job_id.clone())
    }

    /// Replace the current output (keeping any attributed job) and notify
    /// all subscribers.
    pub fn set(&self, output: Output<T>) {
        {
            let mut state = lock(&self.cell.state);
            state.output = output;
        }
        self.cell.bump_and_notify();
    }

    /// Replace the current output and the attributed job, then notify.
    pub fn set_with_job(&self, output: Output<T>, job_id: Option<JobId>) {
        {
            let mut state = lock(&self.cell.state);
            state.output = output;
            state.job_id = job_id;
        }
        self.cell.bump_and_notify();
    }

    /// Register a refresh callback; the returned handle unsubscribes when
    /// dropped or via [`Subscription::unsubscribe`].
    pub fn subscribe(&self, refresh: RefreshFn) -> Subscription {
        self.cell.subscribe_impl(refresh)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.cell.subs).len()
    }

    pub(crate) fn version(&self) -> u64 {
        self.cell.version.load(Ordering::SeqCst)
    }

    pub(crate) fn set_activation_hooks(&self, hooks: ActivationHooks) {
        *lock(&self.cell.hooks) = Some(hooks);
    }

    pub(crate) fn as_source(&self) -> Arc<dyn AnySource> {
        self.cell.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakInput<T> {
        WeakInput {
            cell: Arc::downgrade(&self.cell),
        }
    }
}

/// Weak handle used by monitor drivers so a driver does not keep its own
/// input alive forever.
pub(crate) struct WeakInput<T> {
    cell: Weak<Cell<T>>,
}

impl<T> Clone for WeakInput<T> {
    fn clone(&self) -> Self {
        WeakInput {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> WeakInput<T> {
    pub fn upgrade(&self) -> Option<Input<T>> {
        self.cell.upgrade().map(|cell| Input { cell })
    }
}

impl<T: Send + Sync + 'static> Cell<T> {
    fn bump_and_notify(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);

        // Snapshot under the lock, deliver outside it so a refresh callback
        // may itself subscribe or unsubscribe without deadlocking.
        let pending: Vec<(Arc<AtomicBool>, RefreshFn)> = {
            let subs = lock(&self.subs);
            subs.iter()
                .map(|e| (e.active.clone(), e.refresh.clone()))
                .collect()
        };

        trace!(input = %self.id, subscribers = pending.len(), "input changed; notifying");
        for (active, refresh) in pending {
            if active.load(Ordering::SeqCst) {
                refresh();
            }
        }
    }

    fn subscribe_impl(&self, refresh: RefreshFn) -> Subscription {
        let entry = SubEntry {
            id: NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed),
            active: Arc::new(AtomicBool::new(true)),
            refresh,
        };
        let active = entry.active.clone();
        let sub_id = entry.id;

        let count_after = {
            let mut subs = lock(&self.subs);
            subs.push(entry);
            subs.len()
        };

        if count_after == 1 {
            if let Some(hooks) = lock(&self.hooks).as_ref() {
                (hooks.on_first)();
            }
        }

        let weak = self.weak_self.clone();
        Subscription {
            unsub: Some(Box::new(move || {
                active.store(false, Ordering::SeqCst);
                let Some(cell) = weak.upgrade() else {
                    return;
                };
                let emptied = {
                    let mut subs = lock(&cell.subs);
                    subs.retain(|e| e.id != sub_id);
                    subs.is_empty()
                };
                if emptied {
                    if let Some(hooks) = lock(&cell.hooks).as_ref() {
                        (hooks.on_last)();
                    }
                }
            })),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AnySource for Cell<T> {
    fn id(&self) -> InputId {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn subscribe_refresh(&self, refresh: RefreshFn) -> Subscription {
        self.subscribe_impl(refresh)
    }
}

/// Handle for an active subscription.
///
/// Dropping the handle unsubscribes; calling [`unsubscribe`] does the same
/// explicitly. Both are idempotent.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    unsub: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(unsub: Box<dyn FnOnce() + Send>) -> Self {
        Subscription { unsub: Some(unsub) }
    }

    pub fn unsubscribe(mut self) {
        self.run_unsub();
    }

    fn run_unsub(&mut self) {
        if let Some(f) = self.unsub.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_unsub();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.unsub.is_some())
            .finish()
    }
}
