//! Result backend
//!
//! In-memory storage of invocation outcomes plus the waiting machinery that
//! turns them into awaitable handles. Waiters register a oneshot sender
//! under the invocation id; completion drains and fires them. Group results
//! are slot tables filled by member position, so joined values come back in
//! member order no matter which member finishes first.

use crate::error::QueueError;
use crate::types::{GroupId, GroupRef, InvocationId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// State of one invocation as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    /// Queued or running; no outcome yet.
    Pending,
    /// Finished with a value.
    Done(Value),
    /// Failed permanently.
    Failed { task: String, reason: String },
}

#[derive(Debug)]
struct GroupEntry {
    slots: Vec<Option<Value>>,
    remaining: usize,
    failed: Option<(String, String)>,
    waiters: Vec<oneshot::Sender<Result<Vec<Value>, QueueError>>>,
}

/// In-memory result backend shared by the engine, workers, and result
/// handles.
#[derive(Debug)]
pub struct ResultBackend {
    states: RwLock<HashMap<InvocationId, TaskState>>,
    waiters: Mutex<HashMap<InvocationId, Vec<oneshot::Sender<Result<Value, QueueError>>>>>,
    groups: Mutex<HashMap<GroupId, GroupEntry>>,
}

impl ResultBackend {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Record that an invocation has been queued.
    pub fn mark_pending(&self, id: InvocationId) {
        self.states
            .write()
            .entry(id)
            .or_insert(TaskState::Pending);
    }

    /// Store a completed result and wake its waiters.
    pub fn mark_done(&self, id: InvocationId, value: Value) {
        self.states
            .write()
            .insert(id, TaskState::Done(value.clone()));
        let waiters = self.waiters.lock().remove(&id).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(Ok(value.clone()));
        }
    }

    /// Record a permanent failure and wake its waiters.
    pub fn mark_failed(&self, id: InvocationId, task: &str, reason: &str) {
        self.states.write().insert(
            id,
            TaskState::Failed {
                task: task.to_string(),
                reason: reason.to_string(),
            },
        );
        let waiters = self.waiters.lock().remove(&id).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(Err(QueueError::TaskFailed {
                task: task.to_string(),
                reason: reason.to_string(),
            }));
        }
    }

    /// Current state of an invocation, if the backend has seen it.
    pub fn state(&self, id: InvocationId) -> Option<TaskState> {
        self.states.read().get(&id).cloned()
    }

    /// Wait for an invocation's result value.
    pub async fn wait(
        &self,
        id: InvocationId,
        timeout: Option<Duration>,
    ) -> Result<Value, QueueError> {
        // Register the waiter while still holding the state lock, so a
        // completion between snapshot and registration cannot be missed.
        let rx = {
            let states = self.states.read();
            match states.get(&id) {
                Some(TaskState::Done(value)) => return Ok(value.clone()),
                Some(TaskState::Failed { task, reason }) => {
                    return Err(QueueError::TaskFailed {
                        task: task.clone(),
                        reason: reason.clone(),
                    })
                }
                Some(TaskState::Pending) | None => {
                    let (tx, rx) = oneshot::channel();
                    self.waiters.lock().entry(id).or_default().push(tx);
                    rx
                }
            }
        };

        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(QueueError::ChannelClosed),
                Err(_) => Err(QueueError::ResultTimeout(id)),
            },
            None => match rx.await {
                Ok(result) => result,
                Err(_) => Err(QueueError::ChannelClosed),
            },
        }
    }

    /// Create the slot table for a group of `size` members.
    pub fn register_group(&self, size: usize) -> GroupId {
        let id = GroupId::next();
        self.groups.lock().insert(
            id,
            GroupEntry {
                slots: vec![None; size],
                remaining: size,
                failed: None,
                waiters: Vec::new(),
            },
        );
        id
    }

    /// Fill one group slot, waking joiners when the group completes.
    pub fn record_group_member(&self, group: GroupRef, value: Value) {
        let mut groups = self.groups.lock();
        let Some(entry) = groups.get_mut(&group.group) else {
            debug!(group_id = %group.group, position = group.position, "Result for unknown group");
            return;
        };
        if entry.failed.is_some() {
            return;
        }
        if let Some(slot) = entry.slots.get_mut(group.position) {
            if slot.is_none() {
                entry.remaining -= 1;
            }
            *slot = Some(value);
        }
        if entry.remaining == 0 {
            let values: Vec<Value> = entry
                .slots
                .iter()
                .map(|slot| slot.clone().unwrap_or(Value::Null))
                .collect();
            for tx in entry.waiters.drain(..) {
                let _ = tx.send(Ok(values.clone()));
            }
        }
    }

    /// Record a member failure; every joiner of the group fails.
    pub fn fail_group_member(&self, group: GroupRef, task: &str, reason: &str) {
        let mut groups = self.groups.lock();
        let Some(entry) = groups.get_mut(&group.group) else {
            return;
        };
        if entry.failed.is_some() {
            return;
        }
        entry.failed = Some((task.to_string(), reason.to_string()));
        for tx in entry.waiters.drain(..) {
            let _ = tx.send(Err(QueueError::TaskFailed {
                task: task.to_string(),
                reason: reason.to_string(),
            }));
        }
    }

    /// Await every member of a group, values in slot order.
    pub async fn join_group(
        &self,
        id: GroupId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, QueueError> {
        let rx = {
            let mut groups = self.groups.lock();
            let entry = groups.get_mut(&id).ok_or(QueueError::GroupNotFound(id))?;
            if let Some((task, reason)) = &entry.failed {
                return Err(QueueError::TaskFailed {
                    task: task.clone(),
                    reason: reason.clone(),
                });
            }
            if entry.remaining == 0 {
                return Ok(entry
                    .slots
                    .iter()
                    .map(|slot| slot.clone().unwrap_or(Value::Null))
                    .collect());
            }
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            rx
        };

        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(QueueError::ChannelClosed),
                Err(_) => Err(QueueError::GroupTimeout(id)),
            },
            None => match rx.await {
                Ok(result) => result,
                Err(_) => Err(QueueError::ChannelClosed),
            },
        }
    }
}

impl Default for ResultBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable handle to one invocation's result.
#[derive(Debug, Clone)]
pub struct AsyncResult {
    id: InvocationId,
    backend: Arc<ResultBackend>,
}

impl AsyncResult {
    pub(crate) fn new(id: InvocationId, backend: Arc<ResultBackend>) -> Self {
        Self { id, backend }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Current state without waiting.
    pub fn state(&self) -> Option<TaskState> {
        self.backend.state(self.id)
    }

    /// Wait for the result value.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Value, QueueError> {
        self.backend.wait(self.id, timeout).await
    }
}

/// Awaitable handle to a group's ordered results.
#[derive(Debug, Clone)]
pub struct GroupResult {
    id: GroupId,
    members: Vec<InvocationId>,
    backend: Arc<ResultBackend>,
}

impl GroupResult {
    pub(crate) fn new(id: GroupId, members: Vec<InvocationId>, backend: Arc<ResultBackend>) -> Self {
        Self {
            id,
            members,
            backend,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Member invocation ids in slot order.
    pub fn members(&self) -> &[InvocationId] {
        &self.members
    }

    /// Await every member, values in slot order.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<Vec<Value>, QueueError> {
        self.backend.join_group(self.id, timeout).await
    }
}
