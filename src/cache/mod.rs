// src/cache/mod.rs

//! Deduplicating publisher for side-effecting operations.
//!
//! An [`Operation`] describes an expensive external effect ("POST this
//! status", "push that image") keyed by a digestible key. The cache
//! guarantees at most one in-flight execution per key, collapses repeated
//! requests for the same `(key, value)` into one run, and re-runs when the
//! value changes, a rebuild is requested, or a validity window expires.
//!
//! Every entry exposes its state through an [`Input`], so cache outcomes
//! plug straight back into pipelines as primitives.

pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::digest;
use crate::errors::Result;
use crate::input::{Input, JobId};
use crate::output::{ActiveReason, Msg, Output};

use self::store::{CacheStore, EntryRecord, RecordedOutcome};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative cancellation switch carried by every job.
///
/// Cancellation is a request: the job observes the switch at its own
/// suspension points and cleans up.
#[derive(Clone)]
pub struct Switch {
    inner: Arc<SwitchInner>,
}

struct SwitchInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Switch {
    pub fn new() -> Self {
        Switch {
            inner: Arc::new(SwitchInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle passed to [`Operation::publish`]: the job's identity plus its
/// cancellation switch.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    switch: Switch,
}

impl Job {
    fn new(id: JobId) -> Self {
        Job {
            id,
            switch: Switch::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn switch(&self) -> &Switch {
        &self.switch
    }
}

/// Validity window for one run. `Default` means "valid forever".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub valid_for: Option<Duration>,
}

impl Schedule {
    pub fn valid_for(duration: Duration) -> Self {
        Schedule {
            valid_for: Some(duration),
        }
    }
}

/// A side-effecting operation that plugs into the cache.
pub trait Operation: Send + Sync + 'static {
    /// Identifies the entry together with the key's digest.
    type Key: Serialize + Clone + Send + Sync + 'static;
    /// The payload to publish; runs are deduplicated by its digest.
    type Value: Serialize + Clone + Send + Sync + 'static;
    /// The success type, restored from persisted rows on startup.
    type Outcome: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Globally unique operation name.
    fn id(&self) -> &'static str;

    /// Whether a newer value may interrupt a running publish.
    fn auto_cancel(&self) -> bool {
        false
    }

    /// Perform the effect. Implementations should observe
    /// `job.switch()` at their suspension points.
    fn publish(
        &self,
        job: Job,
        key: &Self::Key,
        value: &Self::Value,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Self::Outcome, Msg>> + Send>>;

    /// One-line description for logs.
    fn pp(&self, key: &Self::Key, value: &Self::Value) -> String;
}

/// Anything the engine can drain on shutdown.
pub trait Drainable: Send + Sync {
    fn drain(&self, grace: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

struct RunningJob {
    job: Job,
    value_digest: String,
}

struct Desired<V> {
    value: V,
    value_digest: String,
    schedule: Schedule,
}

struct FinishedRun {
    value_digest: String,
    finished_wall: SystemTime,
    /// Monotonic finish time for schedule expiry; `None` for entries
    /// restored from a store.
    finished_mono: Option<Instant>,
    ok: bool,
}

struct Entry<O: Operation> {
    key: O::Key,
    key_digest: String,
    input: Input<O::Outcome>,
    build: u64,
    rebuild_requested: bool,
    ready_at: Option<SystemTime>,
    running_at: Option<SystemTime>,
    running: Option<RunningJob>,
    desired: Option<Desired<O::Value>>,
    finished: Option<FinishedRun>,
    last_outcome: Option<RecordedOutcome>,
    last_job_id: Option<JobId>,
}

/// Point-in-time view of one entry, for observers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub build: u64,
    pub rebuild_requested: bool,
    pub running: bool,
    pub finished_ok: Option<bool>,
}

struct CacheState<O: Operation> {
    entries: Mutex<HashMap<String, Entry<O>>>,
    restored: Mutex<HashMap<String, EntryRecord>>,
    store: Option<Arc<dyn CacheStore>>,
    job_counter: AtomicU64,
    inflight: AtomicU64,
    idle: Notify,
}

/// The cache for one operation. Clones share state.
pub struct OutputCache<O: Operation> {
    op: Arc<O>,
    state: Arc<CacheState<O>>,
}

impl<O: Operation> Clone for OutputCache<O> {
    fn clone(&self) -> Self {
        OutputCache {
            op: Arc::clone(&self.op),
            state: Arc::clone(&self.state),
        }
    }
}

impl<O: Operation> OutputCache<O> {
    pub fn new(op: O) -> Self {
        Self::build(op, None)
    }

    /// Create a cache backed by a store, bootstrapping from its rows.
    pub fn with_store(op: O, store: Arc<dyn CacheStore>) -> Result<Self> {
        let cache = Self::build(op, Some(store));
        let rows = cache
            .state
            .store
            .as_ref()
            .map(|s| s.load(cache.op.id()))
            .transpose()?
            .unwrap_or_default();
        info!(op = cache.op.id(), rows = rows.len(), "bootstrapping cache");
        let mut restored = lock(&cache.state.restored);
        for row in rows {
            restored.insert(row.key_digest.clone(), row);
        }
        drop(restored);
        Ok(cache)
    }

    fn build(op: O, store: Option<Arc<dyn CacheStore>>) -> Self {
        OutputCache {
            op: Arc::new(op),
            state: Arc::new(CacheState {
                entries: Mutex::new(HashMap::new()),
                restored: Mutex::new(HashMap::new()),
                store,
                job_counter: AtomicU64::new(0),
                inflight: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Request that `value` be published for `key`.
    ///
    /// Returns the entry's input (stable per key), through which the
    /// outcome is observable: `Active(Running)` while publishing, then
    /// `Ok(outcome)` or `Error`. Duplicate requests for a value already
    /// running or already delivered are collapsed.
    pub fn set(
        &self,
        key: &O::Key,
        value: O::Value,
        schedule: Schedule,
    ) -> Result<Input<O::Outcome>> {
        let key_digest = digest::digest_of(self.op.id(), key)?;
        let value_digest = digest::digest_value(&value)?;

        let mut entries = lock(&self.state.entries);
        let entry = entries
            .entry(key_digest.clone())
            .or_insert_with(|| self.new_entry(key, &key_digest));

        entry.desired = Some(Desired {
            value,
            value_digest: value_digest.clone(),
            schedule,
        });

        if let Some(running) = &entry.running {
            if running.value_digest == value_digest && !entry.rebuild_requested {
                debug!(
                    op = self.op.id(),
                    job = %running.job.id(),
                    "request deduplicated; publish already in flight"
                );
                return Ok(entry.input.clone());
            }
            if self.op.auto_cancel() {
                info!(
                    op = self.op.id(),
                    job = %running.job.id(),
                    "newer value; cancelling running publish"
                );
                running.job.switch().cancel();
            } else {
                // Let the current job complete; the completion handler
                // starts the follow-up run with the latest value.
                entry.input.set(Output::Active(ActiveReason::ReadyToRerun));
            }
            entry.ready_at = Some(SystemTime::now());
            return Ok(entry.input.clone());
        }

        let needs_run = match &entry.finished {
            None => true,
            Some(finished) => {
                entry.rebuild_requested
                    || finished.value_digest != value_digest
                    || expired(finished, schedule)
            }
        };
        if needs_run {
            entry.ready_at = Some(SystemTime::now());
            self.start_run_locked(entry);
        }
        Ok(entry.input.clone())
    }

    /// Mark the entry for re-execution. The flag is sticky: it survives
    /// until a new run actually starts.
    pub fn rebuild(&self, key: &O::Key) -> Result<()> {
        let key_digest = digest::digest_of(self.op.id(), key)?;
        let mut entries = lock(&self.state.entries);
        let Some(entry) = entries.get_mut(&key_digest) else {
            return Ok(());
        };
        info!(op = self.op.id(), build = entry.build, "rebuild requested");
        entry.rebuild_requested = true;
        if entry.running.is_none() {
            if entry.desired.is_some() {
                entry.ready_at = Some(SystemTime::now());
                self.start_run_locked(entry);
            } else {
                entry.input.set(Output::Active(ActiveReason::ReadyToRerun));
                self.write_record(entry);
            }
        } else {
            self.write_record(entry);
        }
        Ok(())
    }

    /// Forget the entry entirely, cancelling any in-flight job.
    pub fn invalidate(&self, key: &O::Key) -> Result<()> {
        let key_digest = digest::digest_of(self.op.id(), key)?;
        let mut entries = lock(&self.state.entries);
        if let Some(entry) = entries.remove(&key_digest) {
            info!(op = self.op.id(), "entry invalidated");
            if let Some(running) = &entry.running {
                running.job.switch().cancel();
            }
        }
        Ok(())
    }

    pub fn snapshot(&self, key: &O::Key) -> Result<Option<EntrySnapshot>> {
        let key_digest = digest::digest_of(self.op.id(), key)?;
        let entries = lock(&self.state.entries);
        Ok(entries.get(&key_digest).map(|entry| EntrySnapshot {
            build: entry.build,
            rebuild_requested: entry.rebuild_requested,
            running: entry.running.is_some(),
            finished_ok: entry.finished.as_ref().map(|f| f.ok),
        }))
    }

    pub fn inflight_count(&self) -> u64 {
        self.state.inflight.load(Ordering::SeqCst)
    }

    /// Wait up to `grace` for in-flight jobs to finish, then cancel any
    /// stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            if self.state.inflight.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::select! {
                _ = self.state.idle.notified() => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        warn!(op = self.op.id(), "shutdown grace expired; cancelling jobs");
        let entries = lock(&self.state.entries);
        for entry in entries.values() {
            if let Some(running) = &entry.running {
                running.job.switch().cancel();
            }
        }
    }

    fn new_entry(&self, key: &O::Key, key_digest: &str) -> Entry<O> {
        let label = format!("{}:{}", self.op.id(), &key_digest[..8.min(key_digest.len())]);
        let mut entry = Entry {
            key: key.clone(),
            key_digest: key_digest.to_string(),
            input: Input::new(label, Output::Active(ActiveReason::ReadyToRerun)),
            build: 0,
            rebuild_requested: false,
            ready_at: None,
            running_at: None,
            running: None,
            desired: None,
            finished: None,
            last_outcome: None,
            last_job_id: None,
        };

        let restored = lock(&self.state.restored).remove(key_digest);
        if let Some(row) = restored {
            self.restore_entry(&mut entry, row);
        }
        entry
    }

    fn restore_entry(&self, entry: &mut Entry<O>, row: EntryRecord) {
        let Some(outcome) = row.outcome else {
            // A row without an outcome means the process died mid-run;
            // keep the build counter, re-run on the next set.
            entry.build = row.build;
            entry.rebuild_requested = row.rebuild_requested;
            return;
        };
        let restored_output = match &outcome {
            RecordedOutcome::Ok(value) => {
                match serde_json::from_value::<O::Outcome>(value.clone()) {
                    Ok(v) => Output::Ok(v),
                    Err(err) => {
                        warn!(
                            op = self.op.id(),
                            error = %err,
                            "could not restore outcome; treating entry as fresh"
                        );
                        return;
                    }
                }
            }
            RecordedOutcome::Err(msg) => Output::Error(msg.clone()),
        };
        let ok = restored_output.is_ok();
        entry.build = row.build;
        entry.rebuild_requested = row.rebuild_requested;
        entry.input.set_with_job(restored_output, row.job_id.clone());
        entry.finished = Some(FinishedRun {
            value_digest: row.value_digest.clone(),
            finished_wall: row.finished_ts.unwrap_or_else(SystemTime::now),
            finished_mono: None,
            ok,
        });
        entry.last_outcome = Some(outcome);
        entry.last_job_id = row.job_id;
        entry.ready_at = row.ready_ts;
        entry.running_at = row.running_ts;
        debug!(op = self.op.id(), build = entry.build, "entry restored from store");
    }

    fn start_run_locked(&self, entry: &mut Entry<O>) {
        let Some(desired) = &entry.desired else {
            return;
        };
        let value = desired.value.clone();
        let value_digest = desired.value_digest.clone();
        let schedule = desired.schedule;

        entry.build += 1;
        entry.rebuild_requested = false;
        let job_number = self.state.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job::new(JobId(format!("job-{}-{}", self.op.id(), job_number)));
        entry.running = Some(RunningJob {
            job: job.clone(),
            value_digest: value_digest.clone(),
        });
        entry.running_at = Some(SystemTime::now());
        entry.last_job_id = Some(job.id().clone());
        entry.last_outcome = None;
        entry
            .input
            .set_with_job(Output::Active(ActiveReason::Running), Some(job.id().clone()));

        info!(
            op = self.op.id(),
            job = %job.id(),
            build = entry.build,
            desc = %self.op.pp(&entry.key, &value),
            "starting publish"
        );
        self.write_record(entry);
        self.state.inflight.fetch_add(1, Ordering::SeqCst);

        let fut = self.op.publish(job.clone(), &entry.key, &value);
        let cache = self.clone();
        let key_digest = entry.key_digest.clone();
        tokio::spawn(async move {
            let result = fut.await;
            cache.complete(&key_digest, value_digest, schedule, result);
        });
    }

    fn complete(
        &self,
        key_digest: &str,
        value_digest: String,
        _schedule: Schedule,
        result: std::result::Result<O::Outcome, Msg>,
    ) {
        {
            let mut entries = lock(&self.state.entries);
            if let Some(entry) = entries.get_mut(key_digest) {
                let job_id = entry.running.take().map(|r| r.job.id().clone());
                let ok = result.is_ok();

                entry.finished = Some(FinishedRun {
                    value_digest: value_digest.clone(),
                    finished_wall: SystemTime::now(),
                    finished_mono: Some(Instant::now()),
                    ok,
                });

                match result {
                    Ok(outcome) => {
                        info!(
                            op = self.op.id(),
                            job = job_id.as_ref().map(|j| j.0.as_str()).unwrap_or("?"),
                            build = entry.build,
                            "publish finished"
                        );
                        entry.last_outcome = match serde_json::to_value(&outcome) {
                            Ok(value) => Some(RecordedOutcome::Ok(value)),
                            Err(err) => {
                                warn!(op = self.op.id(), error = %err, "outcome not serializable");
                                None
                            }
                        };
                        entry.input.set_with_job(Output::Ok(outcome), job_id.clone());
                    }
                    Err(msg) => {
                        warn!(
                            op = self.op.id(),
                            job = job_id.as_ref().map(|j| j.0.as_str()).unwrap_or("?"),
                            build = entry.build,
                            error = %msg,
                            "publish failed"
                        );
                        entry.last_outcome = Some(RecordedOutcome::Err(msg.clone()));
                        entry.input.set_with_job(Output::Error(msg), job_id.clone());
                    }
                }
                self.write_record(entry);

                // Follow-up: a newer value queued behind this run, or a
                // sticky rebuild request.
                let wants_newer = entry
                    .desired
                    .as_ref()
                    .map(|d| d.value_digest != value_digest)
                    .unwrap_or(false);
                if wants_newer || entry.rebuild_requested {
                    self.start_run_locked(entry);
                }
            }
        }
        self.state.inflight.fetch_sub(1, Ordering::SeqCst);
        self.state.idle.notify_waiters();
    }

    fn write_record(&self, entry: &Entry<O>) {
        let Some(store) = &self.state.store else {
            return;
        };
        let value_digest = entry
            .running
            .as_ref()
            .map(|r| r.value_digest.clone())
            .or_else(|| entry.finished.as_ref().map(|f| f.value_digest.clone()))
            .or_else(|| entry.desired.as_ref().map(|d| d.value_digest.clone()))
            .unwrap_or_default();
        let record = EntryRecord {
            op_id: self.op.id().to_string(),
            key_digest: entry.key_digest.clone(),
            build: entry.build,
            value_digest,
            outcome: entry.last_outcome.clone(),
            job_id: entry.last_job_id.clone(),
            ready_ts: entry.ready_at,
            running_ts: entry.running_at,
            finished_ts: entry.finished.as_ref().map(|f| f.finished_wall),
            rebuild_requested: entry.rebuild_requested,
        };
        if let Err(err) = store.write(&record) {
            warn!(op = self.op.id(), error = %err, "cache store write failed");
        }
    }
}

impl<O: Operation> Drainable for OutputCache<O> {
    fn drain(&self, grace: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let cache = self.clone();
        Box::pin(async move { cache.shutdown(grace).await })
    }
}

fn expired(finished: &FinishedRun, schedule: Schedule) -> bool {
    let Some(valid_for) = schedule.valid_for else {
        return false;
    };
    match finished.finished_mono {
        Some(at) => at.elapsed() > valid_for,
        None => match finished.finished_wall.elapsed() {
            Ok(elapsed) => elapsed > valid_for,
            Err(_) => false,
        },
    }
}
