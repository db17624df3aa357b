//! In-process message broker
//!
//! A bounded FIFO of envelopes shared by the engine and its workers. An
//! envelope is one queued invocation plus the pipeline state that travels
//! with it. Workers wait on a notifier with a poll timeout, so shutdown
//! never hangs on an empty queue.

use crate::composition::Deferred;
use crate::context::Context;
use crate::error::QueueError;
use crate::signature::Signature;
use crate::types::{ChordRef, GroupRef, InvocationId};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::warn;

/// One queued invocation and the pipeline state travelling with it.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Id the invocation's result is stored under.
    pub id: InvocationId,
    /// The call to execute.
    pub signature: Signature,
    /// Follow-up pipelines dispatched with the result.
    pub callbacks: Vec<Deferred>,
    /// Chord slot the result fills.
    pub chord: Option<ChordRef>,
    /// Group slot the result fills.
    pub group: Option<GroupRef>,
    /// Retry attempt this delivery represents.
    pub retries: u32,
    /// When the envelope entered the queue.
    pub enqueued_at: Instant,
}

impl Envelope {
    pub fn new(id: InvocationId, signature: Signature) -> Self {
        Self {
            id,
            signature,
            callbacks: Vec::new(),
            chord: None,
            group: None,
            retries: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Open the envelope into a fresh execution context.
    pub(crate) fn context(&self) -> Context {
        Context {
            id: self.id,
            task: self.signature.task.clone(),
            callbacks: self.callbacks.clone(),
            chord: self.chord,
            group: self.group,
            retries: self.retries,
        }
    }
}

/// Bounded in-process envelope queue.
pub struct Broker {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    capacity: usize,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue an envelope, waking one worker.
    pub async fn push(&self, envelope: Envelope) -> Result<(), QueueError> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            warn!(
                queue_size = queue.len(),
                max_size = self.capacity,
                task = %envelope.signature.task,
                "Queue is full, dropping envelope"
            );
            return Err(QueueError::QueueFull {
                capacity: self.capacity,
            });
        }
        queue.push_back(envelope);
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next envelope if one is queued.
    pub async fn pop(&self) -> Option<Envelope> {
        self.queue.lock().await.pop_front()
    }

    /// Take the next envelope, waiting up to `poll_interval` for a wakeup.
    ///
    /// Returns `None` on timeout so callers can re-check their running flag.
    pub async fn next(&self, poll_interval: Duration) -> Option<Envelope> {
        if let Some(envelope) = self.pop().await {
            return Some(envelope);
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = sleep(poll_interval) => {}
        }
        self.pop().await
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}
