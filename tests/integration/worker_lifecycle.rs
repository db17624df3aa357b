//! Integration tests for worker pool lifecycle and queue behavior
//!
//! Tests cover:
//! - Queue capacity limits
//! - Retry behavior and exhaustion
//! - Unknown task handling
//! - Statistics across mixed outcomes
//! - ignore_result registrations
//! - Graceful shutdown and restart

use async_trait::async_trait;
use baton::app::Baton;
use baton::backend::TaskState;
use baton::config::BatonConfig;
use baton::context::Context;
use baton::error::{QueueError, TaskError};
use baton::registry::{Outcome, TaskHandler, TaskOptions};
use baton::signature::Signature;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::test_utils::{first_i64, test_app, test_config, wait_until, Recorder};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_queue_capacity_limit() {
    let config = BatonConfig {
        queue_capacity: 2,
        ..test_config()
    };
    let app = Baton::new(config).unwrap();
    app.register("noop", |_args| Outcome::value(Value::Null))
        .unwrap();
    // Workers are intentionally not started, so envelopes stay queued.

    app.send(Signature::new("noop")).await.unwrap();
    app.send(Signature::new("noop")).await.unwrap();
    let err = app.send(Signature::new("noop")).await.unwrap_err();
    assert!(matches!(err, QueueError::QueueFull { capacity: 2 }));
    assert_eq!(app.queue_len().await, 2);
}

#[tokio::test]
async fn test_failed_invocation_retries_until_success() {
    let app = test_app();
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    app.register_with(
        "flaky",
        TaskOptions {
            max_retries: 3,
            ..TaskOptions::default()
        },
        move |args| {
            let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(TaskError::failed("transient"))
            } else {
                Outcome::value(first_i64(&args))
            }
        },
    )
    .unwrap();
    app.start();

    let result = app.send(Signature::new("flaky").arg(json!(11))).await.unwrap();
    assert_eq!(result.get(Some(WAIT)).await.unwrap(), json!(11));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    assert!(wait_until(WAIT, || app.stats().completed == 1).await);
    assert_eq!(app.stats().failed, 0);

    app.shutdown().await;
}

#[tokio::test]
async fn test_retries_exhaust_into_permanent_failure() {
    let app = test_app();
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    app.register_with(
        "doomed",
        TaskOptions {
            max_retries: 1,
            ..TaskOptions::default()
        },
        move |_args| -> Result<Outcome, TaskError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::failed("still broken"))
        },
    )
    .unwrap();
    app.start();

    let result = app.send(Signature::new("doomed")).await.unwrap();
    match result.get(Some(WAIT)).await {
        Err(QueueError::TaskFailed { task, reason }) => {
            assert_eq!(task, "doomed");
            assert!(reason.contains("still broken"));
        }
        other => panic!("expected permanent failure, got {:?}", other),
    }
    // Initial attempt plus one retry.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(wait_until(WAIT, || app.stats().failed == 1).await);

    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_task_fails_its_result() {
    let app = test_app();
    app.start();

    let result = app.send(Signature::new("ghost")).await.unwrap();
    match result.get(Some(WAIT)).await {
        Err(QueueError::TaskFailed { task, .. }) => assert_eq!(task, "ghost"),
        other => panic!("expected failure for unknown task, got {:?}", other),
    }
    assert!(wait_until(WAIT, || app.stats().failed == 1).await);

    app.shutdown().await;
}

#[tokio::test]
async fn test_stats_track_mixed_outcomes() {
    let app = test_app();
    app.register("ok", |_args| Outcome::value(1)).unwrap();
    app.register("bad", |_args| -> Result<Outcome, TaskError> {
        Err(TaskError::failed("no"))
    })
    .unwrap();
    app.start();

    app.send(Signature::new("ok")).await.unwrap();
    app.send(Signature::new("ok")).await.unwrap();
    app.send(Signature::new("bad")).await.unwrap();

    assert!(wait_until(WAIT, || {
        let stats = app.stats();
        stats.completed == 2 && stats.failed == 1
    })
    .await);
    let stats = app.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);

    app.shutdown().await;
}

#[tokio::test]
async fn test_ignore_result_skips_storage() {
    let app = test_app();
    let recorder = Recorder::new();
    app.register_with(
        "silent",
        TaskOptions {
            ignore_result: true,
            ..TaskOptions::default()
        },
        recorder.sink(),
    )
    .unwrap();
    app.start();

    let result = app.send(Signature::new("silent").arg(json!(5))).await.unwrap();
    assert!(wait_until(WAIT, || app.stats().completed == 1).await);

    // The task ran, but its result was never stored.
    assert_eq!(recorder.hits(), vec![json!(5)]);
    assert!(matches!(result.state(), Some(TaskState::Pending)));

    app.shutdown().await;
}

struct Slow;

#[async_trait]
impl TaskHandler for Slow {
    async fn run(&self, _ctx: &mut Context, _args: Vec<Value>) -> Result<Outcome, TaskError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Outcome::value("done")
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_inflight_invocation() {
    let app = test_app();
    app.register_task("slow", TaskOptions::default(), Arc::new(Slow))
        .unwrap();
    app.start();

    let result = app.send(Signature::new("slow")).await.unwrap();
    assert!(wait_until(WAIT, || app.stats().processing == 1).await);

    // Stop must wait for the in-flight invocation to finish.
    app.shutdown().await;
    assert_eq!(app.stats().completed, 1);
    assert!(matches!(result.state(), Some(TaskState::Done(_))));
}

#[tokio::test]
async fn test_workers_restart_after_shutdown() {
    let app = test_app();
    app.register("ping", |_args| Outcome::value("pong")).unwrap();

    app.start();
    let first = app.send(Signature::new("ping")).await.unwrap();
    assert_eq!(first.get(Some(WAIT)).await.unwrap(), json!("pong"));
    app.shutdown().await;
    assert!(!app.is_running());

    app.start();
    assert!(app.is_running());
    let second = app.send(Signature::new("ping")).await.unwrap();
    assert_eq!(second.get(Some(WAIT)).await.unwrap(), json!("pong"));
    app.shutdown().await;
}
