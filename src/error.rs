//! Error types for the dynamic task pipeline engine.

use crate::types::{GroupId, InvocationId};
use thiserror::Error;

/// Failures raised by user task handlers.
///
/// The engine treats these as opaque: a handler error fails the invocation
/// (after any configured retries) and is stored as the invocation's outcome.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Shorthand for a plain task failure with a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}

/// Engine-side errors: registration, dispatch, and result retrieval.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task not registered: {0}")]
    TaskNotRegistered(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Cannot dispatch an empty pipeline")]
    EmptyPipeline,

    #[error("Task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Timed out waiting for result {0}")]
    ResultTimeout(InvocationId),

    #[error("Timed out waiting for group {0}")]
    GroupTimeout(GroupId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Completion channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for QueueError {
    fn from(err: config::ConfigError) -> Self {
        QueueError::ConfigError(err.to_string())
    }
}
