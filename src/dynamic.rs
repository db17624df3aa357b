//! Dynamic task pipelines
//!
//! A dynamic task may return further deferred work instead of a value. The
//! wrapper here splices that work into the running pipeline: pending
//! callbacks chain onto it, and any chord or group obligation the invocation
//! carried moves onto it, so the spliced work finishes everything the
//! original invocation owed. Result handles keep working because terminal
//! invocation ids travel with the deferred work.

use crate::context::Context;
use crate::error::TaskError;
use crate::registry::{Outcome, TaskHandler};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Splice a deferred outcome into the invocation's pipeline state
///
/// # Arguments
/// * `outcome` - What the task body produced
/// * `ctx` - The invocation's execution context
///
/// # Returns
/// * The outcome, with a deferred outcome rewritten to the spliced pipeline
///
/// # Behavior
/// * `Outcome::Value` passes through untouched; the context is not modified
/// * A deferred outcome is frozen: its entry stage no longer accepts result
///   injection
/// * The first pending callback chains after the deferred; further pending
///   callbacks are dropped (logged at debug level)
/// * Chord and group obligations move from the context onto the deferred
/// * The context's callback list is replaced by the spliced deferred alone
pub fn splice_pipeline(outcome: Outcome, ctx: &mut Context) -> Outcome {
    let mut retval = match outcome {
        Outcome::Value(value) => return Outcome::Value(value),
        Outcome::Defer(deferred) => deferred,
    };

    // The deferred stands in for this invocation's result; its arguments
    // are final from here on.
    retval.freeze();

    let pending = std::mem::take(&mut ctx.callbacks);
    let dropped = pending.len().saturating_sub(1);
    if dropped > 0 {
        debug!(
            invocation_id = %ctx.id,
            task = %ctx.task,
            dropped,
            "Multiple pending callbacks; chaining the first, dropping the rest"
        );
    }
    if let Some(first) = pending.into_iter().next() {
        retval = retval.then(first);
    }

    if let Some(chord) = ctx.chord.take() {
        retval.set_chord(chord);
    }
    if let Some(group) = ctx.group.take() {
        retval.set_group(group);
    }

    ctx.callbacks = vec![retval.clone()];
    Outcome::Defer(retval)
}

/// Wrapper giving a task handler dynamic-pipeline behavior.
///
/// Runs the inner handler, then splices a deferred outcome into the
/// pipeline. Handler errors propagate unchanged; a failed invocation never
/// splices.
pub struct DynamicTask<H> {
    inner: H,
}

impl<H: TaskHandler> DynamicTask<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for DynamicTask<H> {
    async fn run(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Outcome, TaskError> {
        let outcome = self.inner.run(ctx, args).await?;
        Ok(splice_pipeline(outcome, ctx))
    }
}

/// Wrap a handler so deferred outcomes splice into the running pipeline.
pub fn dynamic_task<H: TaskHandler>(handler: H) -> DynamicTask<H> {
    DynamicTask::new(handler)
}
