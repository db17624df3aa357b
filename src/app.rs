//! Application facade
//!
//! `Baton` wires the task registry, broker, result backend, chord
//! coordinator, and worker pool together behind one handle. Register tasks,
//! send pipelines, await results.

use crate::backend::{AsyncResult, GroupResult};
use crate::composition::{Deferred, Group};
use crate::config::BatonConfig;
use crate::dynamic::DynamicTask;
use crate::error::{QueueError, TaskError};
use crate::registry::{FnHandler, Outcome, TaskHandler, TaskOptions};
use crate::signature::Signature;
use crate::types::{GroupRef, InvocationId};
use crate::worker::{Engine, QueueStats, WorkerPool};
use serde_json::Value;
use std::sync::Arc;

/// Task queue application
///
/// One instance owns the whole runtime. Cheap to share behind an `Arc`;
/// every method takes `&self`.
pub struct Baton {
    engine: Arc<Engine>,
    pool: WorkerPool,
}

impl Baton {
    /// Create an application with the given configuration.
    pub fn new(config: BatonConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            engine: Arc::new(Engine::new(config)),
            pool: WorkerPool::new(),
        })
    }

    /// Register a plain task under a unique name.
    pub fn register<F>(&self, name: impl Into<String>, f: F) -> Result<(), QueueError>
    where
        F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.register_with(name, TaskOptions::default(), f)
    }

    /// Register a plain task with execution options.
    pub fn register_with<F>(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        f: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.engine
            .registry
            .register(name, options, Arc::new(FnHandler::new(f)))
    }

    /// Register a handler implementing [`TaskHandler`] directly.
    pub fn register_task(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), QueueError> {
        self.engine.registry.register(name, options, handler)
    }

    /// Register a dynamic task.
    ///
    /// A dynamic task may return [`Outcome::Defer`]; the returned pipeline
    /// is spliced into the invocation's place, inheriting its callbacks and
    /// chord or group obligations. Value outcomes behave exactly like a
    /// plain task's.
    pub fn register_dynamic<F>(&self, name: impl Into<String>, f: F) -> Result<(), QueueError>
    where
        F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.register_dynamic_with(name, TaskOptions::default(), f)
    }

    /// Register a dynamic task with execution options.
    pub fn register_dynamic_with<F>(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        f: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        self.engine
            .registry
            .register(name, options, Arc::new(DynamicTask::new(FnHandler::new(f))))
    }

    /// Register a dynamic task from a full [`TaskHandler`].
    pub fn register_dynamic_task<H>(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        handler: H,
    ) -> Result<(), QueueError>
    where
        H: TaskHandler + 'static,
    {
        self.engine
            .registry
            .register(name, options, Arc::new(DynamicTask::new(handler)))
    }

    /// Send a pipeline for execution.
    ///
    /// # Arguments
    /// * `pipeline` - A signature, chain, chord, or any deferred invocation
    ///
    /// # Returns
    /// * `AsyncResult` - Handle on the pipeline's terminal result
    ///
    /// # Behavior
    /// * The terminal invocation id is pinned before anything is enqueued,
    ///   so the handle stays valid across dynamic splices.
    pub async fn send(&self, pipeline: impl Into<Deferred>) -> Result<AsyncResult, QueueError> {
        let id = self.engine.dispatch(pipeline.into(), None).await?;
        Ok(AsyncResult::new(id, Arc::clone(&self.engine.backend)))
    }

    /// Send a single task call by name.
    pub async fn send_task(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<AsyncResult, QueueError> {
        self.send(Signature::new(task).with_args(args)).await
    }

    /// Send a group of parallel calls.
    ///
    /// Members run with no ordering between them. The returned handle joins
    /// their results in member order.
    pub async fn send_group(&self, group: Group) -> Result<GroupResult, QueueError> {
        if group.members.is_empty() {
            return Err(QueueError::EmptyPipeline);
        }
        let group_id = self.engine.backend.register_group(group.members.len());
        let mut member_ids = Vec::with_capacity(group.members.len());
        for (position, member) in group.members.into_iter().enumerate() {
            let mut deferred = Deferred::task(member);
            deferred.set_group(GroupRef::new(group_id, position));
            let id = self.engine.dispatch(deferred, None).await?;
            member_ids.push(id);
        }
        Ok(GroupResult::new(
            group_id,
            member_ids,
            Arc::clone(&self.engine.backend),
        ))
    }

    /// Result handle for a previously pinned invocation id.
    pub fn result(&self, id: InvocationId) -> AsyncResult {
        AsyncResult::new(id, Arc::clone(&self.engine.backend))
    }

    /// Start background workers (idempotent).
    pub fn start(&self) {
        self.pool.start(Arc::clone(&self.engine));
    }

    /// Stop background workers and wait for them to exit (idempotent).
    pub async fn shutdown(&self) {
        self.pool.stop().await;
    }

    /// Whether workers are currently running.
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Snapshot of queue statistics.
    pub fn stats(&self) -> QueueStats {
        self.engine.stats_snapshot()
    }

    /// Number of envelopes currently queued.
    pub async fn queue_len(&self) -> usize {
        self.engine.broker.len().await
    }

    /// The active configuration.
    pub fn config(&self) -> &BatonConfig {
        &self.engine.config
    }
}
