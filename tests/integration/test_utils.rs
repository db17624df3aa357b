//! Shared test utilities for integration tests
//!
//! Provides an application factory tuned for fast test turnaround, a
//! side-effect recorder for observing task execution, and a polling helper
//! for awaiting background progress.

use baton::app::Baton;
use baton::config::BatonConfig;
use baton::error::TaskError;
use baton::registry::Outcome;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Configuration tuned for tests: short polls, short retry delays.
pub fn test_config() -> BatonConfig {
    BatonConfig {
        workers: 2,
        queue_capacity: 256,
        poll_interval_ms: 10,
        retry_delay_ms: 10,
        ..BatonConfig::default()
    }
}

/// A fresh application using [`test_config`]. Workers are not started.
pub fn test_app() -> Baton {
    Baton::new(test_config()).unwrap()
}

/// First argument as i64, defaulting to 0.
pub fn first_i64(args: &[Value]) -> i64 {
    args.first().and_then(Value::as_i64).unwrap_or(0)
}

/// Records every invocation of its sink handlers.
///
/// Cloning shares the underlying hit list, so a test can hand sinks to the
/// application and inspect the hits afterwards.
#[derive(Clone, Default)]
pub struct Recorder {
    hits: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded values in arrival order.
    pub fn hits(&self) -> Vec<Value> {
        self.hits.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len()
    }

    /// Handler that records its first argument and echoes it back.
    pub fn sink(&self) -> impl Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync + 'static
    {
        let hits = Arc::clone(&self.hits);
        move |args: Vec<Value>| {
            let first = args.into_iter().next().unwrap_or(Value::Null);
            hits.lock().push(first.clone());
            Ok(Outcome::Value(first))
        }
    }
}

/// Poll `predicate` until it holds or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
