//! Worker pool and dispatch engine
//!
//! `Engine` turns deferred pipelines into queued envelopes and applies each
//! finished invocation's epilogue: store the result, settle chord and group
//! obligations, and dispatch pending callbacks with result injection.
//! `WorkerPool` runs the envelope loop on tokio tasks with an idempotent
//! start/stop lifecycle around a shared running flag.

use crate::backend::ResultBackend;
use crate::broker::{Broker, Envelope};
use crate::chord::ChordCoordinator;
use crate::composition::{Chain, Chord, Deferred, DeferredKind};
use crate::config::BatonConfig;
use crate::context::Context;
use crate::error::QueueError;
use crate::registry::{Outcome, TaskRegistry};
use crate::signature::Signature;
use crate::types::{ChordRef, GroupRef, InvocationId};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    /// Envelopes waiting in the queue.
    pub pending: usize,
    /// Envelopes currently executing on a worker.
    pub processing: usize,
    /// Invocations that finished successfully.
    pub completed: usize,
    /// Invocations that failed permanently.
    pub failed: usize,
}

/// Shared engine internals: registry, broker, backend, chord coordinator,
/// stats, and configuration.
pub(crate) struct Engine {
    pub(crate) registry: TaskRegistry,
    pub(crate) broker: Broker,
    pub(crate) backend: Arc<ResultBackend>,
    pub(crate) chords: ChordCoordinator,
    pub(crate) stats: RwLock<QueueStats>,
    pub(crate) config: BatonConfig,
}

impl Engine {
    pub(crate) fn new(config: BatonConfig) -> Self {
        Self {
            registry: TaskRegistry::new(),
            broker: Broker::new(config.queue_capacity),
            backend: Arc::new(ResultBackend::new()),
            chords: ChordCoordinator::new(),
            stats: RwLock::new(QueueStats::default()),
            config,
        }
    }

    /// Dispatch a deferred pipeline, optionally injecting a predecessor's
    /// result at its entry stage.
    ///
    /// Returns the pipeline's pinned terminal result id. A chain enqueues
    /// only its head; the remainder travels as the head's callback. A chord
    /// registers its body with the coordinator and enqueues the header
    /// members with their slot positions.
    pub(crate) async fn dispatch(
        &self,
        deferred: Deferred,
        inject: Option<Value>,
    ) -> Result<InvocationId, QueueError> {
        let mut current = deferred;
        let result_id = current.ensure_result_id()?;
        let mut inject = inject;

        loop {
            if let Some(value) = inject.take() {
                current.inject(value);
            }
            let Deferred { kind, chord, group } = current;
            match kind {
                DeferredKind::Single(signature) => {
                    self.enqueue_signature(signature, Vec::new(), chord, group)
                        .await?;
                    return Ok(result_id);
                }
                DeferredKind::Chain(chain) => {
                    let Chain { mut steps, tail } = chain;
                    if steps.is_empty() {
                        match tail {
                            Some(tail_chord) => {
                                current = Deferred {
                                    kind: DeferredKind::Chord(*tail_chord),
                                    chord,
                                    group,
                                };
                                continue;
                            }
                            None => return Err(QueueError::EmptyPipeline),
                        }
                    }
                    let first = steps.remove(0);
                    if steps.is_empty() && tail.is_none() {
                        // Last step; it settles the pipeline's obligations
                        // itself.
                        self.enqueue_signature(first, Vec::new(), chord, group)
                            .await?;
                    } else {
                        let rest = Deferred {
                            kind: DeferredKind::Chain(Chain { steps, tail }),
                            chord,
                            group,
                        };
                        self.enqueue_signature(first, vec![rest], None, None)
                            .await?;
                    }
                    return Ok(result_id);
                }
                DeferredKind::Chord(shape) => {
                    let Chord { header, body } = shape;
                    let mut body = *body;
                    body.chord = body.chord.or(chord);
                    body.group = body.group.or(group);
                    if header.is_empty() {
                        // Degenerate chord: nothing to wait for, the body
                        // runs immediately with an empty result set.
                        current = body;
                        inject = Some(Value::Array(Vec::new()));
                        continue;
                    }
                    let size = header.len();
                    let chord_id = self.chords.register(body, size)?;
                    for (position, member) in header.into_iter().enumerate() {
                        self.enqueue_signature(
                            member,
                            Vec::new(),
                            Some(ChordRef::new(chord_id, position)),
                            None,
                        )
                        .await?;
                    }
                    return Ok(result_id);
                }
            }
        }
    }

    async fn enqueue_signature(
        &self,
        mut signature: Signature,
        callbacks: Vec<Deferred>,
        chord: Option<ChordRef>,
        group: Option<GroupRef>,
    ) -> Result<InvocationId, QueueError> {
        let id = signature.ensure_task_id();
        let task = signature.task.clone();
        let mut envelope = Envelope::new(id, signature);
        envelope.callbacks = callbacks;
        envelope.chord = chord;
        envelope.group = group;

        self.backend.mark_pending(id);
        self.broker.push(envelope).await?;
        {
            let mut stats = self.stats.write();
            stats.pending += 1;
        }
        debug!(invocation_id = %id, task = %task, "Enqueued invocation");
        Ok(id)
    }

    pub(crate) fn stats_snapshot(&self) -> QueueStats {
        self.stats.read().clone()
    }
}

/// Outcome of processing one envelope.
enum Processed {
    Completed,
    Failed,
    Retry(Envelope),
}

/// Background workers draining the broker.
pub(crate) struct WorkerPool {
    workers: RwLock<Vec<tokio::task::JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start background workers (idempotent).
    pub(crate) fn start(&self, engine: Arc<Engine>) {
        let mut running = self.running.write();
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let mut workers = self.workers.write();
        for worker_id in 0..engine.config.workers {
            let engine = Arc::clone(&engine);
            let running = Arc::clone(&self.running);
            let handle = tokio::spawn(async move {
                Self::worker_loop(worker_id, engine, running).await;
            });
            workers.push(handle);
        }
        info!(worker_count = workers.len(), "Started pipeline workers");
    }

    /// Stop background workers (graceful shutdown, idempotent).
    pub(crate) async fn stop(&self) {
        let mut running = self.running.write();
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        let workers = std::mem::take(&mut *self.workers.write());
        join_all(workers).await;
        info!("Stopped pipeline workers");
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.running.read()
    }

    async fn worker_loop(worker_id: usize, engine: Arc<Engine>, running: Arc<RwLock<bool>>) {
        debug!(worker_id, "Worker started");
        let poll_interval = Duration::from_millis(engine.config.poll_interval_ms);

        while *running.read() {
            let Some(envelope) = engine.broker.next(poll_interval).await else {
                continue;
            };

            {
                let mut stats = engine.stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.processing += 1;
            }

            match Self::process_envelope(&engine, worker_id, envelope).await {
                Processed::Completed => {
                    let mut stats = engine.stats.write();
                    stats.processing = stats.processing.saturating_sub(1);
                    stats.completed += 1;
                }
                Processed::Failed => {
                    let mut stats = engine.stats.write();
                    stats.processing = stats.processing.saturating_sub(1);
                    stats.failed += 1;
                }
                Processed::Retry(envelope) => {
                    {
                        let mut stats = engine.stats.write();
                        stats.processing = stats.processing.saturating_sub(1);
                    }
                    sleep(Duration::from_millis(engine.config.retry_delay_ms)).await;
                    match engine.broker.push(envelope.clone()).await {
                        Ok(()) => {
                            let mut stats = engine.stats.write();
                            stats.pending += 1;
                        }
                        Err(e) => {
                            error!(
                                worker_id,
                                invocation_id = %envelope.id,
                                error = %e,
                                "Failed to requeue invocation for retry"
                            );
                            engine.backend.mark_failed(
                                envelope.id,
                                &envelope.signature.task,
                                &e.to_string(),
                            );
                            let mut ctx = envelope.context();
                            Self::settle_failure(
                                &engine,
                                &mut ctx,
                                &envelope.signature.task,
                                &e.to_string(),
                            );
                            let mut stats = engine.stats.write();
                            stats.failed += 1;
                        }
                    }
                }
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    /// Run one envelope and apply its epilogue.
    async fn process_envelope(engine: &Engine, worker_id: usize, envelope: Envelope) -> Processed {
        let mut ctx = envelope.context();
        debug!(
            worker_id,
            invocation_id = %envelope.id,
            task = %envelope.signature.task,
            attempt = envelope.retries + 1,
            wait_ms = envelope.enqueued_at.elapsed().as_millis() as u64,
            "Processing invocation"
        );

        let registered = match engine.registry.resolve(&envelope.signature.task) {
            Ok(task) => task,
            Err(e) => {
                error!(
                    worker_id,
                    invocation_id = %envelope.id,
                    task = %envelope.signature.task,
                    "Unknown task"
                );
                let reason = e.to_string();
                engine
                    .backend
                    .mark_failed(envelope.id, &envelope.signature.task, &reason);
                Self::settle_failure(engine, &mut ctx, &envelope.signature.task, &reason);
                return Processed::Failed;
            }
        };

        let result = registered
            .handler
            .run(&mut ctx, envelope.signature.args.clone())
            .await;

        match result {
            Ok(outcome) => {
                let value = match &outcome {
                    Outcome::Value(value) => value.clone(),
                    // The deferred itself is the invocation's recorded
                    // result; the live pipeline state already moved into
                    // the context during splicing.
                    Outcome::Defer(deferred) => match serde_json::to_value(deferred) {
                        Ok(value) => value,
                        Err(e) => {
                            let reason = e.to_string();
                            error!(
                                worker_id,
                                invocation_id = %envelope.id,
                                error = %reason,
                                "Failed to serialize deferred result"
                            );
                            engine.backend.mark_failed(
                                envelope.id,
                                &envelope.signature.task,
                                &reason,
                            );
                            Self::settle_failure(
                                engine,
                                &mut ctx,
                                &envelope.signature.task,
                                &reason,
                            );
                            return Processed::Failed;
                        }
                    },
                };
                if registered.options.ignore_result {
                    debug!(invocation_id = %envelope.id, "Result ignored by task options");
                } else {
                    engine.backend.mark_done(envelope.id, value.clone());
                }
                Self::settle_success(engine, &mut ctx, value).await;
                Processed::Completed
            }
            Err(e) => {
                if envelope.retries < registered.options.max_retries {
                    warn!(
                        worker_id,
                        invocation_id = %envelope.id,
                        task = %envelope.signature.task,
                        attempt = envelope.retries + 1,
                        error = %e,
                        "Invocation failed; will retry"
                    );
                    let mut retry = envelope;
                    retry.retries += 1;
                    Processed::Retry(retry)
                } else {
                    let reason = e.to_string();
                    error!(
                        worker_id,
                        invocation_id = %envelope.id,
                        task = %envelope.signature.task,
                        retries = envelope.retries,
                        error = %reason,
                        "Invocation failed permanently"
                    );
                    engine
                        .backend
                        .mark_failed(envelope.id, &envelope.signature.task, &reason);
                    Self::settle_failure(engine, &mut ctx, &envelope.signature.task, &reason);
                    Processed::Failed
                }
            }
        }
    }

    /// Settle a successful invocation's pipeline obligations.
    async fn settle_success(engine: &Engine, ctx: &mut Context, value: Value) {
        if let Some(chord) = ctx.chord.take() {
            if let Some((body, results)) = engine.chords.complete(chord, value.clone()) {
                debug!(chord_id = %chord.chord, "Chord complete; dispatching body");
                let mut body = body;
                let label = body.entry_task().unwrap_or("chord body").to_string();
                match body.ensure_result_id() {
                    Ok(body_id) => {
                        if let Err(e) = engine
                            .dispatch(body, Some(Value::Array(results)))
                            .await
                        {
                            error!(chord_id = %chord.chord, error = %e, "Failed to dispatch chord body");
                            engine.backend.mark_failed(body_id, &label, &e.to_string());
                        }
                    }
                    Err(e) => {
                        error!(chord_id = %chord.chord, error = %e, "Chord body is not dispatchable");
                    }
                }
            }
        }

        if let Some(group) = ctx.group.take() {
            engine.backend.record_group_member(group, value.clone());
        }

        for mut callback in std::mem::take(&mut ctx.callbacks) {
            let label = callback.entry_task().unwrap_or("pipeline").to_string();
            let callback_id = match callback.ensure_result_id() {
                Ok(id) => id,
                Err(e) => {
                    error!(invocation_id = %ctx.id, error = %e, "Dropping undispatchable callback");
                    continue;
                }
            };
            if let Err(e) = engine.dispatch(callback, Some(value.clone())).await {
                error!(
                    invocation_id = %ctx.id,
                    callback_id = %callback_id,
                    error = %e,
                    "Failed to dispatch callback"
                );
                engine
                    .backend
                    .mark_failed(callback_id, &label, &e.to_string());
            }
        }
    }

    /// Settle a failed invocation's pipeline obligations.
    ///
    /// The pipeline stops here: pending callbacks never run and their
    /// terminal results are failed with the same reason, the chord body is
    /// failed through its pinned result id, and the group slot is marked
    /// failed.
    fn settle_failure(engine: &Engine, ctx: &mut Context, task: &str, reason: &str) {
        if let Some(chord) = ctx.chord.take() {
            if let Some(body_id) = engine.chords.fail(chord) {
                warn!(chord_id = %chord.chord, "Chord member failed; failing chord body");
                engine.backend.mark_failed(body_id, task, reason);
            }
        }
        if let Some(group) = ctx.group.take() {
            engine.backend.fail_group_member(group, task, reason);
        }
        for mut callback in std::mem::take(&mut ctx.callbacks) {
            if let Ok(id) = callback.ensure_result_id() {
                engine.backend.mark_failed(id, task, reason);
            }
            // Obligations riding the dropped callback settle as failures
            // too, so no chord or group waits on work that will never run.
            if let Some(chord) = callback.chord.take() {
                if let Some(body_id) = engine.chords.fail(chord) {
                    engine.backend.mark_failed(body_id, task, reason);
                }
            }
            if let Some(group) = callback.group.take() {
                engine.backend.fail_group_member(group, task, reason);
            }
        }
    }
}
