//! Per-invocation execution context.
//!
//! The context is the mutable pipeline state of one running invocation:
//! which follow-ups are pending, and which chord or group slot the result
//! must fill. It is owned by the worker executing the invocation and passed
//! to the task handler as an explicit `&mut` parameter; there is no ambient
//! or thread-local request state.

use crate::composition::Deferred;
use crate::types::{ChordRef, GroupRef, InvocationId};

#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Id of the running invocation.
    pub id: InvocationId,
    /// Registered name of the running task.
    pub task: String,
    /// Pending follow-up pipelines, dispatched with this invocation's
    /// result once it completes.
    pub callbacks: Vec<Deferred>,
    /// Chord slot this invocation's result fills, if any.
    pub chord: Option<ChordRef>,
    /// Group slot this invocation's result fills, if any.
    pub group: Option<GroupRef>,
    /// Zero-based retry attempt of this execution.
    pub retries: u32,
}

impl Context {
    /// A fresh context with no pending pipeline state.
    pub fn new(id: InvocationId, task: impl Into<String>) -> Self {
        Self {
            id,
            task: task.into(),
            callbacks: Vec::new(),
            chord: None,
            group: None,
            retries: 0,
        }
    }
}
