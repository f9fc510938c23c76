// src/engine/broadcast.rs

//! Webhook refresh fan-out.
//!
//! A [`Broadcaster`] is an explicit object owned by whoever receives the
//! external signal (typically next to the engine) and handed to monitors;
//! there is no process-global channel. Each [`signal_all`] pokes every
//! live subscription once. Missed signals are fine: a later signal
//! triggers the same refresh.
//!
//! [`signal_all`]: Broadcaster::signal_all

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::input::{RefreshFn, Subscription};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    refresh: RefreshFn,
}

struct Inner {
    subs: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Broadcast channel for "something external happened, everyone re-check".
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            inner: Arc::new(Inner {
                subs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Invoke every subscribed refresh callback once.
    pub fn signal_all(&self) {
        let pending: Vec<(Arc<AtomicBool>, RefreshFn)> = {
            let subs = lock(&self.inner.subs);
            subs.iter()
                .map(|e| (e.active.clone(), e.refresh.clone()))
                .collect()
        };
        debug!(subscribers = pending.len(), "broadcast signal");
        for (active, refresh) in pending {
            if active.load(Ordering::SeqCst) {
                refresh();
            }
        }
    }

    /// Register a refresh callback; dropping the handle unsubscribes.
    pub fn subscribe_refresh(&self, refresh: RefreshFn) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        lock(&self.inner.subs).push(Entry {
            id,
            active: active.clone(),
            refresh,
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(Box::new(move || {
            active.store(false, Ordering::SeqCst);
            if let Some(inner) = weak.upgrade() {
                lock(&inner.subs).retain(|e| e.id != id);
            }
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subs).len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn signals_every_live_subscriber_once() {
        let broadcaster = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let subs: Vec<Subscription> = (0..3)
            .map(|_| {
                let hits = hits.clone();
                broadcaster
                    .subscribe_refresh(Arc::new(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }))
            })
            .collect();

        broadcaster.signal_all();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        drop(subs);
    }

    #[test]
    fn unsubscribed_callbacks_are_not_invoked() {
        let broadcaster = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let sub = {
            let hits = hits.clone();
            broadcaster.subscribe_refresh(Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
        };
        sub.unsubscribe();

        broadcaster.signal_all();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
