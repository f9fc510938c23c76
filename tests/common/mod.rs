#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use livedag::{Job, Msg, Operation};

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// A publish that records every invocation and completes after a fixed
/// delay, observing its cancellation switch.
pub struct RecordingOp {
    pub op_id: &'static str,
    pub auto_cancel: bool,
    pub delay: Duration,
    pub publishes: Arc<Mutex<Vec<(String, u32)>>>,
    pub started: Arc<AtomicU64>,
    pub fail_with: Option<String>,
}

impl RecordingOp {
    pub fn new(op_id: &'static str) -> Self {
        RecordingOp {
            op_id,
            auto_cancel: false,
            delay: Duration::from_millis(50),
            publishes: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(AtomicU64::new(0)),
            fail_with: None,
        }
    }

    pub fn auto_cancel(mut self) -> Self {
        self.auto_cancel = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, msg: &str) -> Self {
        self.fail_with = Some(msg.to_string());
        self
    }

    pub fn published(&self) -> Vec<(String, u32)> {
        self.publishes.lock().unwrap().clone()
    }
}

impl Operation for RecordingOp {
    type Key = String;
    type Value = u32;
    type Outcome = String;

    fn id(&self) -> &'static str {
        self.op_id
    }

    fn auto_cancel(&self) -> bool {
        self.auto_cancel
    }

    fn publish(
        &self,
        job: Job,
        key: &String,
        value: &u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, Msg>> + Send>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let publishes = self.publishes.clone();
        let key = key.clone();
        let value = *value;
        let delay = self.delay;
        let fail_with = self.fail_with.clone();
        Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = job.switch().cancelled() => {
                    return Err(Msg::new("publish cancelled"));
                }
            }
            if let Some(msg) = fail_with {
                return Err(Msg::new(msg));
            }
            publishes.lock().unwrap().push((key.clone(), value));
            Ok(format!("{key}#{value}"))
        })
    }

    fn pp(&self, key: &String, value: &u32) -> String {
        format!("publish {value} for {key}")
    }
}
