//! Deferred single task calls.

use crate::types::InvocationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One deferred task call: a registered task name plus its bound arguments
/// and delivery options.
///
/// A signature is data, not behavior. It can be stored, serialized, composed
/// into chains and chords, and handed between pipeline stages before the
/// engine turns it into a queued invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Registered task name.
    pub task: String,
    /// Positional arguments, JSON-encoded.
    pub args: Vec<Value>,
    /// Pinned invocation id. When set, the queued invocation stores its
    /// result under this id, so a caller can hold a result handle for a
    /// stage that has not been enqueued yet.
    pub task_id: Option<InvocationId>,
    /// When true, the pipeline may no longer prepend a predecessor's result
    /// to `args`.
    pub immutable: bool,
}

impl Signature {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            args: Vec::new(),
            task_id: None,
            immutable: false,
        }
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    /// Replace the whole argument list.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Mark the signature immutable: pipeline result injection is refused.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Pin the invocation id the queued call will store its result under.
    pub fn with_task_id(mut self, id: InvocationId) -> Self {
        self.task_id = Some(id);
        self
    }

    /// Pin an invocation id if none is set yet, and return it.
    pub(crate) fn ensure_task_id(&mut self) -> InvocationId {
        match self.task_id {
            Some(id) => id,
            None => {
                let id = InvocationId::next();
                self.task_id = Some(id);
                id
            }
        }
    }

    /// Prepend a predecessor's result to the argument list.
    ///
    /// Immutable signatures refuse injection and keep their bound arguments
    /// untouched.
    pub(crate) fn inject(&mut self, value: Value) {
        if !self.immutable {
            self.args.insert(0, value);
        }
    }
}
