// tests/file_monitor.rs

//! A realistic input provider: a monitor backed by a filesystem watcher.
//!
//! This exercises the full monitor contract against real external state:
//! `read` loads the file, `watch` registers a `notify` watcher whose
//! callback fires the monitor's refresh, and the returned handle keeps
//! the watcher alive until the monitor goes idle.

mod common;
use crate::common::init_tracing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use livedag::{monitor, Input, MonitorConfig, Msg, Output, RefreshFn, WatchHandle};

fn file_monitor(path: PathBuf) -> Input<String> {
    let read_path = path.clone();
    monitor(
        format!("file {}", path.display()),
        move || {
            let path = read_path.clone();
            async move {
                tokio::fs::read_to_string(&path)
                    .await
                    .map(|s| s.trim_end().to_string())
                    .map_err(|e| Msg::new(format!("reading {}: {e}", path.display())))
            }
        },
        move |refresh| {
            let path = path.clone();
            async move {
                let mut watcher = RecommendedWatcher::new(
                    move |res: notify::Result<Event>| {
                        if res.is_ok() {
                            refresh();
                        }
                    },
                    Config::default(),
                )
                .map_err(|e| Msg::new(format!("creating watcher: {e}")))?;

                let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|e| Msg::new(format!("watching {}: {e}", dir.display())))?;

                // Moving the watcher into the unwatch closure keeps it
                // alive for exactly as long as the monitor is active.
                Ok(WatchHandle::new(move || async move {
                    drop(watcher);
                }))
            }
        },
    )
    .config(MonitorConfig {
        rate_limit: Duration::from_millis(200),
        idle_grace: Duration::from_millis(100),
        backoff_start: Duration::from_millis(100),
        backoff_cap: Duration::from_secs(1),
    })
    .build()
}

async fn wait_for_value(input: &Input<String>, want: &str) {
    timeout(Duration::from_secs(15), async {
        loop {
            if input.get().0 == Output::Ok(want.to_string()) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("monitor never produced {want:?}; last: {:?}", input.get().0));
}

#[tokio::test(flavor = "multi_thread")]
async fn file_changes_flow_through_the_monitor() {
    init_tracing();

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("branch-head");
    std::fs::write(&path, "commit-a\n").expect("seed file");

    let input = file_monitor(path.clone());
    let _sub = input.subscribe(Arc::new(|| {}) as RefreshFn);

    wait_for_value(&input, "commit-a").await;

    std::fs::write(&path, "commit-b\n").expect("update file");
    wait_for_value(&input, "commit-b").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_file_reports_an_error_then_recovers() {
    init_tracing();

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent");

    let input = file_monitor(path.clone());
    let _sub = input.subscribe(Arc::new(|| {}) as RefreshFn);

    timeout(Duration::from_secs(15), async {
        loop {
            if input.get().0.is_error() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("missing file never surfaced as an error");

    std::fs::write(&path, "now it exists\n").expect("create file");
    wait_for_value(&input, "now it exists").await;
}
