//! Task registration
//!
//! Maps registered task names to handlers and their options. Handlers are
//! async (`async-trait`) and shared behind `Arc`, so one registration serves
//! every worker.

use crate::composition::Deferred;
use crate::context::Context;
use crate::error::{QueueError, TaskError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a task handler produced: a plain value, or deferred work standing in
/// for the result.
///
/// `Defer` has splicing behavior only for handlers registered as dynamic
/// (see [`crate::dynamic`]); from a plain handler it is stored like any
/// other value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// An ordinary result value.
    Value(Value),
    /// Deferred work standing in for the result.
    Defer(Deferred),
}

impl Outcome {
    /// Serialize a result into an `Outcome::Value`.
    pub fn value<T: serde::Serialize>(value: T) -> Result<Self, TaskError> {
        let value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
        Ok(Outcome::Value(value))
    }

    /// Defer to another pipeline.
    pub fn defer(deferred: impl Into<Deferred>) -> Self {
        Outcome::Defer(deferred.into())
    }
}

/// Execution options attached to a task registration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaskOptions {
    /// Skip storing the task's result in the result backend.
    pub ignore_result: bool,
    /// Re-enqueue a failed invocation up to this many times.
    pub max_retries: u32,
}

/// An executable task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task against its execution context and arguments.
    async fn run(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Outcome, TaskError>;
}

/// Adapter for handlers that never touch the execution context.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Result<Outcome, TaskError> + Send + Sync,
{
    async fn run(&self, _ctx: &mut Context, args: Vec<Value>) -> Result<Outcome, TaskError> {
        (self.f)(args)
    }
}

/// One registered task: handler plus options.
#[derive(Clone)]
pub struct RegisteredTask {
    pub handler: Arc<dyn TaskHandler>,
    pub options: TaskOptions,
}

impl fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Task registry
///
/// Holds the in-memory name-to-handler map shared by every worker.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, RegisteredTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under a unique task name.
    pub fn register(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), QueueError> {
        let name = name.into();
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&name) {
            return Err(QueueError::DuplicateTask(name));
        }
        tasks.insert(name, RegisteredTask { handler, options });
        Ok(())
    }

    /// Resolve a task name or return an error.
    pub fn resolve(&self, name: &str) -> Result<RegisteredTask, QueueError> {
        self.tasks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::TaskNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.read().contains_key(name)
    }

    /// Names of all registered tasks.
    pub fn names(&self) -> Vec<String> {
        self.tasks.read().keys().cloned().collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
