//! Integration tests for chord and group coordination
//!
//! Tests cover:
//! - Chord bodies receiving header results in slot order
//! - Dynamic header members handing their chord obligation to the deferred
//!   pipeline, so the body waits on the replacement's result
//! - Group joins, including dynamic members deferring
//! - Failure propagation into chord bodies and group joins

use baton::composition::{Deferred, Group};
use baton::error::{QueueError, TaskError};
use baton::registry::Outcome;
use baton::signature::Signature;
use serde_json::{json, Value};
use std::time::Duration;

use super::test_utils::{first_i64, test_app, wait_until, Recorder};

const WAIT: Duration = Duration::from_secs(5);

fn register_arithmetic(app: &baton::app::Baton) {
    app.register("value", |args| Outcome::value(first_i64(&args)))
        .unwrap();
    app.register("square", |args| {
        let n = first_i64(&args);
        Outcome::value(n * n)
    })
    .unwrap();
    app.register("double", |args| Outcome::value(first_i64(&args) * 2))
        .unwrap();
}

#[tokio::test]
async fn test_chord_body_receives_results_in_slot_order() {
    let app = test_app();
    let recorder = Recorder::new();
    register_arithmetic(&app);
    app.register("collect", recorder.sink()).unwrap();
    app.start();

    let header = vec![
        Signature::new("square").arg(json!(1)),
        Signature::new("square").arg(json!(2)),
        Signature::new("square").arg(json!(3)),
    ];
    let result = app
        .send(Deferred::chord(header, Signature::new("collect")))
        .await
        .unwrap();

    // Slot order holds regardless of which worker finishes first.
    assert_eq!(result.get(Some(WAIT)).await.unwrap(), json!([1, 4, 9]));
    assert_eq!(recorder.hits(), vec![json!([1, 4, 9])]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_chord_member_hands_off_obligation() {
    let app = test_app();
    let recorder = Recorder::new();
    register_arithmetic(&app);
    app.register_dynamic("redirect", |args| {
        let n = first_i64(&args);
        Ok(Outcome::defer(Signature::new("double").arg(json!(n))))
    })
    .unwrap();
    app.register("collect", recorder.sink()).unwrap();
    app.start();

    // The second slot's member defers; the chord must wait for the
    // replacement pipeline's result, not the dynamic task's own.
    let header = vec![
        Signature::new("value").arg(json!(1)),
        Signature::new("redirect").arg(json!(2)),
    ];
    let result = app
        .send(Deferred::chord(header, Signature::new("collect")))
        .await
        .unwrap();

    assert_eq!(result.get(Some(WAIT)).await.unwrap(), json!([1, 4]));
    assert_eq!(recorder.hits(), vec![json!([1, 4])]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_chord_body_chain_threads_results() {
    let app = test_app();
    let recorder = Recorder::new();
    register_arithmetic(&app);
    app.register("sum_array", |args| {
        let total: i64 = args
            .first()
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_i64).sum())
            .unwrap_or(0);
        Outcome::value(total)
    })
    .unwrap();
    app.register("echo", recorder.sink()).unwrap();
    app.start();

    let header = vec![
        Signature::new("value").arg(json!(2)),
        Signature::new("value").arg(json!(3)),
    ];
    let body = Signature::new("sum_array").then(Signature::new("echo"));
    let result = app.send(Deferred::chord(header, body)).await.unwrap();

    assert_eq!(result.get(Some(WAIT)).await.unwrap(), json!(5));
    assert_eq!(recorder.hits(), vec![json!(5)]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_group_then_upgrades_to_chord() {
    let app = test_app();
    let recorder = Recorder::new();
    register_arithmetic(&app);
    app.register("collect", recorder.sink()).unwrap();
    app.start();

    let group = Group::new(vec![
        Signature::new("double").arg(json!(1)),
        Signature::new("double").arg(json!(2)),
    ]);
    let result = app
        .send(group.then(Signature::new("collect")))
        .await
        .unwrap();

    assert_eq!(result.get(Some(WAIT)).await.unwrap(), json!([2, 4]));

    app.shutdown().await;
}

#[tokio::test]
async fn test_group_join_preserves_member_order() {
    let app = test_app();
    register_arithmetic(&app);
    app.start();

    let group = Group::new(vec![
        Signature::new("value").arg(json!(10)),
        Signature::new("value").arg(json!(20)),
        Signature::new("value").arg(json!(30)),
    ]);
    let handle = app.send_group(group).await.unwrap();
    assert_eq!(handle.members().len(), 3);

    let joined = handle.join(Some(WAIT)).await.unwrap();
    assert_eq!(joined, vec![json!(10), json!(20), json!(30)]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_group_member_hands_off_obligation() {
    let app = test_app();
    register_arithmetic(&app);
    app.register_dynamic("redirect", |args| {
        let n = first_i64(&args);
        Ok(Outcome::defer(Signature::new("double").arg(json!(n))))
    })
    .unwrap();
    app.start();

    let group = Group::new(vec![
        Signature::new("value").arg(json!(1)),
        Signature::new("redirect").arg(json!(2)),
    ]);
    let handle = app.send_group(group).await.unwrap();

    // The join observes the replacement pipeline's result in the
    // deferring member's slot.
    let joined = handle.join(Some(WAIT)).await.unwrap();
    assert_eq!(joined, vec![json!(1), json!(4)]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_chord_member_failure_fails_body() {
    let app = test_app();
    let recorder = Recorder::new();
    register_arithmetic(&app);
    app.register("fails", |_args| -> Result<Outcome, TaskError> {
        Err(TaskError::failed("member down"))
    })
    .unwrap();
    app.register("collect", recorder.sink()).unwrap();
    app.start();

    let header = vec![
        Signature::new("value").arg(json!(1)),
        Signature::new("fails"),
    ];
    let result = app
        .send(Deferred::chord(header, Signature::new("collect")))
        .await
        .unwrap();

    match result.get(Some(WAIT)).await {
        Err(QueueError::TaskFailed { task, .. }) => assert_eq!(task, "fails"),
        other => panic!("expected chord body failure, got {:?}", other),
    }
    assert!(wait_until(WAIT, || app.stats().failed >= 1).await);
    assert_eq!(recorder.len(), 0, "body must not run after a member fails");

    app.shutdown().await;
}

#[tokio::test]
async fn test_group_member_failure_fails_join() {
    let app = test_app();
    register_arithmetic(&app);
    app.register("fails", |_args| -> Result<Outcome, TaskError> {
        Err(TaskError::failed("member down"))
    })
    .unwrap();
    app.start();

    let group = Group::new(vec![
        Signature::new("value").arg(json!(1)),
        Signature::new("fails"),
    ]);
    let handle = app.send_group(group).await.unwrap();

    match handle.join(Some(WAIT)).await {
        Err(QueueError::TaskFailed { task, .. }) => assert_eq!(task, "fails"),
        other => panic!("expected group failure, got {:?}", other),
    }

    app.shutdown().await;
}
