// src/engine/runtime.rs

//! The evaluation loop.
//!
//! One tick: evaluate the pipeline term, publish `(output, analysis)`
//! atomically to observers, subscribe a one-shot refresh on every input
//! the pass depended on, then suspend until any of them fires (or an
//! explicit re-run / shutdown signal arrives). A coalescing window
//! between ticks keeps a burst of refreshes from spinning the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::analysis::Analysis;
use crate::cache::Drainable;
use crate::engine::broadcast::Broadcaster;
use crate::errors::Result;
use crate::input::{RefreshFn, Subscription};
use crate::output::{ActiveReason, Output};
use crate::term::eval::evaluate;
use crate::term::Term;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum spacing between ticks; refreshes arriving within the
    /// window merge into one re-evaluation.
    pub coalesce_window: Duration,
    /// How long shutdown waits for in-flight cache jobs before
    /// cancelling them.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Snapshot published to observers after every tick.
#[derive(Clone)]
pub struct EngineState {
    pub output: Output<()>,
    pub analysis: Arc<Analysis>,
    pub tick: u64,
}

impl EngineState {
    fn booting() -> Self {
        EngineState {
            output: Output::Active(ActiveReason::Running),
            analysis: Arc::new(Analysis::booting()),
            tick: 0,
        }
    }
}

/// Drives a pipeline until shut down.
pub struct Engine {
    config: EngineConfig,
    pipeline: Box<dyn Fn() -> Term<()> + Send + Sync>,
    state_tx: watch::Sender<EngineState>,
    rerun: Notify,
    shutdown: Notify,
    shutting_down: AtomicBool,
    caches: Mutex<Vec<Arc<dyn Drainable>>>,
    broadcaster: Broadcaster,
}

impl Engine {
    /// Build an engine around a pipeline constructor. The constructor is
    /// called once per tick; terms it returns may be (and usually are)
    /// clones of terms built once at startup.
    pub fn create(
        config: EngineConfig,
        pipeline: impl Fn() -> Term<()> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (state_tx, _state_rx) = watch::channel(EngineState::booting());
        Arc::new(Engine {
            config,
            pipeline: Box::new(pipeline),
            state_tx,
            rerun: Notify::new(),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
            caches: Mutex::new(Vec::new()),
            broadcaster: Broadcaster::new(),
        })
    }

    /// Observe `(output, analysis, tick)` snapshots. The receiver always
    /// holds the latest published state, starting from the booting
    /// sentinel.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// The broadcaster to hand to monitors that should refresh on
    /// external signals (e.g. an incoming web-hook).
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Register a cache to be drained on shutdown.
    pub fn register_cache(&self, cache: Arc<dyn Drainable>) {
        lock(&self.caches).push(cache);
    }

    /// Force a re-evaluation even if no input changed.
    pub fn rerun_now(&self) {
        self.rerun.notify_one();
    }

    /// Request termination; the loop finishes its current tick, drains
    /// registered caches, and returns.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Run the evaluation loop. Returns after [`shutdown`] (or with the
    /// fatal error if a structural invariant breaks).
    ///
    /// [`shutdown`]: Engine::shutdown
    pub async fn thread(self: Arc<Self>) -> Result<()> {
        info!("engine loop started");
        let mut tick: u64 = 0;

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            tick += 1;

            let term = (self.pipeline)();
            let evaluated = evaluate(&term);
            evaluated.analysis.assert_acyclic()?;

            let stats = evaluated.analysis.stats();
            info!(
                tick,
                status = evaluated.output.status_label(),
                %stats,
                "pipeline evaluated"
            );

            self.state_tx.send_replace(EngineState {
                output: evaluated.output.clone(),
                analysis: Arc::new(evaluated.analysis),
                tick,
            });

            // One-shot wakeup shared by all dependencies of this pass.
            let tick_notify = Arc::new(Notify::new());
            let refresh: RefreshFn = {
                let notify = tick_notify.clone();
                Arc::new(move || notify.notify_one())
            };
            let subs: Vec<Subscription> = evaluated
                .sources
                .iter()
                .map(|dep| dep.source.subscribe_refresh(refresh.clone()))
                .collect();

            // A write landing between the read and the subscription above
            // would be missed; compare versions and skip the wait if so.
            let raced = evaluated
                .sources
                .iter()
                .any(|dep| dep.source.version() != dep.seen_version);
            if raced {
                debug!(tick, "input changed during evaluation; re-running");
            } else {
                tokio::select! {
                    _ = tick_notify.notified() => {
                        debug!(tick, "dependency refresh received");
                    }
                    _ = self.rerun.notified() => {
                        debug!(tick, "explicit re-run requested");
                    }
                    _ = self.shutdown.notified() => {}
                }
            }
            drop(subs);

            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            sleep(self.config.coalesce_window).await;
        }

        self.finish().await;
        Ok(())
    }

    async fn finish(&self) {
        info!("engine shutting down; draining caches");
        let caches: Vec<Arc<dyn Drainable>> = lock(&self.caches).clone();
        for cache in caches {
            cache.drain(self.config.shutdown_grace).await;
        }
        info!("engine stopped");
    }
}
