// src/monitor.rs

//! Generic input driver built from a `read` and a `watch` callback.
//!
//! A monitor turns "fetch current external state" plus "tell me when it
//! may have changed" into an [`Input`]. The driver is lazy: while nothing
//! subscribes to the input, neither callback runs. On the first subscriber
//! it sets up the watcher and fetches; on the last unsubscribe it tears
//! down again after a short grace period.
//!
//! Refresh handling:
//! - a pending read is never cancelled by a refresh; if one fires during
//!   the read, a follow-up read is scheduled after it completes
//! - fetches are rate limited: at most one may start per
//!   [`MonitorConfig::rate_limit`] window, refreshes inside the window
//!   merge into a single follow-up
//! - read failures set the input to `Error` and keep watching
//! - watch setup failures retry with exponential backoff

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::engine::Broadcaster;
use crate::input::{ActivationHooks, Input, RefreshFn, Subscription, WeakInput};
use crate::output::{ActiveReason, Msg, Output};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type BoxedRead<T> = Arc<dyn Fn() -> BoxFuture<Result<T, Msg>> + Send + Sync>;
type BoxedWatch = Arc<dyn Fn(RefreshFn) -> BoxFuture<Result<WatchHandle, Msg>> + Send + Sync>;

/// Returned by a `watch` callback; releases the external watcher when the
/// monitor goes idle.
pub struct WatchHandle {
    unwatch: Box<dyn FnOnce() -> BoxFuture<()> + Send>,
}

impl WatchHandle {
    pub fn new<F, Fut>(unwatch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        WatchHandle {
            unwatch: Box::new(move || Box::pin(unwatch()) as BoxFuture<()>),
        }
    }

    /// For watchers with nothing to release.
    pub fn noop() -> Self {
        Self::new(|| async {})
    }

    async fn release(self) {
        (self.unwatch)().await;
    }
}

/// Tunables for the monitor driver.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Minimum spacing between fetch starts.
    pub rate_limit: Duration,
    /// How long to stay alive after the last unsubscribe, so a quick
    /// resubscribe reuses the running watcher.
    pub idle_grace: Duration,
    /// Initial delay after a failed watch setup.
    pub backoff_start: Duration,
    /// Upper bound for the watch retry delay.
    pub backoff_cap: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(10),
            idle_grace: Duration::from_secs(1),
            backoff_start: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Start describing a monitor. Finish with [`MonitorBuilder::build`].
pub fn monitor<T, R, RFut, W, WFut>(
    pp: impl Into<String>,
    read: R,
    watch: W,
) -> MonitorBuilder<T>
where
    T: Clone + Send + Sync + 'static,
    R: Fn() -> RFut + Send + Sync + 'static,
    RFut: Future<Output = Result<T, Msg>> + Send + 'static,
    W: Fn(RefreshFn) -> WFut + Send + Sync + 'static,
    WFut: Future<Output = Result<WatchHandle, Msg>> + Send + 'static,
{
    MonitorBuilder {
        pp: pp.into(),
        read: Arc::new(move || Box::pin(read()) as BoxFuture<Result<T, Msg>>),
        watch: Arc::new(move |refresh| {
            Box::pin(watch(refresh)) as BoxFuture<Result<WatchHandle, Msg>>
        }),
        config: MonitorConfig::default(),
        broadcaster: None,
    }
}

pub struct MonitorBuilder<T> {
    pp: String,
    read: BoxedRead<T>,
    watch: BoxedWatch,
    config: MonitorConfig,
    broadcaster: Option<Broadcaster>,
}

impl<T: Clone + Send + Sync + 'static> MonitorBuilder<T> {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate_limit(mut self, rate_limit: Duration) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Also refresh whenever the given broadcaster signals (e.g. an
    /// incoming web-hook).
    pub fn external_refresh(mut self, broadcaster: &Broadcaster) -> Self {
        self.broadcaster = Some(broadcaster.clone());
        self
    }

    /// Create the input. The driver starts on its first subscriber.
    pub fn build(self) -> Input<T> {
        let input = Input::new(self.pp.clone(), Output::Active(ActiveReason::Running));
        let core = Arc::new(Core {
            pp: self.pp,
            input: input.downgrade(),
            read: self.read,
            watch: self.watch,
            config: self.config,
            broadcaster: self.broadcaster,
            generation: AtomicU64::new(0),
            driver: Mutex::new(None),
        });

        let on_first = {
            let core = Arc::clone(&core);
            Box::new(move || activate(&core)) as Box<dyn Fn() + Send + Sync>
        };
        let on_last = {
            let core = Arc::clone(&core);
            Box::new(move || deactivate(&core)) as Box<dyn Fn() + Send + Sync>
        };
        input.set_activation_hooks(ActivationHooks { on_first, on_last });
        input
    }
}

struct Core<T> {
    pp: String,
    input: WeakInput<T>,
    read: BoxedRead<T>,
    watch: BoxedWatch,
    config: MonitorConfig,
    broadcaster: Option<Broadcaster>,
    /// Bumped on every subscribe; lets a pending idle teardown detect
    /// that someone came back within the grace period.
    generation: AtomicU64,
    driver: Mutex<Option<DriverCtl>>,
}

struct DriverCtl {
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

fn activate<T: Clone + Send + Sync + 'static>(core: &Arc<Core<T>>) {
    core.generation.fetch_add(1, Ordering::SeqCst);

    let mut driver = lock(&core.driver);
    if driver.is_some() {
        // Still running from before the grace period elapsed.
        return;
    }
    let stop = Arc::new(Notify::new());
    let stopped = Arc::new(AtomicBool::new(false));
    *driver = Some(DriverCtl {
        stop: stop.clone(),
        stopped: stopped.clone(),
    });
    drop(driver);

    debug!(monitor = %core.pp, "first subscriber; starting driver");
    let core = Arc::clone(core);
    tokio::spawn(async move {
        drive(core, stop, stopped).await;
    });
}

fn deactivate<T: Clone + Send + Sync + 'static>(core: &Arc<Core<T>>) {
    let generation = core.generation.load(Ordering::SeqCst);
    let core = Arc::clone(core);
    tokio::spawn(async move {
        sleep(core.config.idle_grace).await;
        if core.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Some(input) = core.input.upgrade() {
            if input.subscriber_count() > 0 {
                return;
            }
        }
        if let Some(ctl) = lock(&core.driver).take() {
            debug!(monitor = %core.pp, "no subscribers; stopping driver");
            ctl.stopped.store(true, Ordering::SeqCst);
            ctl.stop.notify_one();
        }
    });
}

async fn drive<T: Clone + Send + Sync + 'static>(
    core: Arc<Core<T>>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
) {
    let refresh = Arc::new(Notify::new());
    let refresh_cb: RefreshFn = {
        let refresh = refresh.clone();
        Arc::new(move || refresh.notify_one())
    };

    // Webhook fan-in: broadcast signals coalesce into the same permit as
    // watcher-driven refreshes.
    let _external: Option<Subscription> = core
        .broadcaster
        .as_ref()
        .map(|b| b.subscribe_refresh(refresh_cb.clone()));

    // Set up the external watcher, retrying with backoff. Until this
    // succeeds no read runs; the input keeps its previous value.
    let mut backoff = core.config.backoff_start;
    let watch_handle = loop {
        if stopped.load(Ordering::SeqCst) {
            finish(&core);
            return;
        }
        match (core.watch)(refresh_cb.clone()).await {
            Ok(handle) => break handle,
            Err(err) => {
                warn!(monitor = %core.pp, error = %err, retry_in = ?backoff, "watch setup failed");
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = stop.notified() => {
                        finish(&core);
                        return;
                    }
                }
                backoff = (backoff * 2).min(core.config.backoff_cap);
            }
        }
    };
    info!(monitor = %core.pp, "watching");

    loop {
        let fetch_started = Instant::now();
        let result = (core.read)().await;
        let Some(input) = core.input.upgrade() else {
            break;
        };
        match result {
            Ok(value) => input.set(Output::Ok(value)),
            Err(err) => {
                warn!(monitor = %core.pp, error = %err, "read failed");
                input.set(Output::Error(err));
            }
        }
        drop(input);

        // A refresh that fired during the read is stored as a permit, so
        // this returns immediately and schedules the follow-up fetch.
        tokio::select! {
            _ = refresh.notified() => {}
            _ = stop.notified() => break,
        }
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        // Rate limit, measured from the previous fetch start. Refreshes
        // arriving during the pause merge into the next fetch.
        let elapsed = fetch_started.elapsed();
        if elapsed < core.config.rate_limit {
            tokio::select! {
                _ = sleep(core.config.rate_limit - elapsed) => {}
                _ = stop.notified() => break,
            }
            if stopped.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    watch_handle.release().await;
    finish(&core);
    debug!(monitor = %core.pp, "driver stopped");
}

fn finish<T>(core: &Arc<Core<T>>) {
    *lock(&core.driver) = None;
}
