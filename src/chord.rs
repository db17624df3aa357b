//! Chord coordination
//!
//! A chord is a parallel header whose ordered results feed one finalizer
//! body. The coordinator tracks each chord's countdown and slot table; when
//! the last member reports, it releases the body for dispatch together with
//! the ordered results. A member failure instead fails the body's pinned
//! result id, and the body never runs.

use crate::composition::Deferred;
use crate::error::QueueError;
use crate::types::{ChordId, ChordRef, InvocationId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

struct ChordEntry {
    slots: Vec<Option<Value>>,
    remaining: usize,
    body: Option<Deferred>,
    body_result_id: InvocationId,
}

/// Tracks every chord with outstanding header members.
pub struct ChordCoordinator {
    chords: Mutex<HashMap<ChordId, ChordEntry>>,
}

impl ChordCoordinator {
    pub fn new() -> Self {
        Self {
            chords: Mutex::new(HashMap::new()),
        }
    }

    /// Register a chord: its finalizer body and header size.
    ///
    /// Pins the body's result id so a failure can be reported against it
    /// even though the body is never enqueued in that case.
    pub fn register(&self, mut body: Deferred, size: usize) -> Result<ChordId, QueueError> {
        let body_result_id = body.ensure_result_id()?;
        let id = ChordId::next();
        self.chords.lock().insert(
            id,
            ChordEntry {
                slots: vec![None; size],
                remaining: size,
                body: Some(body),
                body_result_id,
            },
        );
        debug!(chord_id = %id, members = size, "Registered chord");
        Ok(id)
    }

    /// Report one member's result.
    ///
    /// Returns the finalizer body and the ordered header results once the
    /// last member has reported; `None` while members are outstanding or
    /// after the chord has failed.
    pub fn complete(&self, chord: ChordRef, value: Value) -> Option<(Deferred, Vec<Value>)> {
        let mut chords = self.chords.lock();
        let Some(entry) = chords.get_mut(&chord.chord) else {
            debug!(chord_id = %chord.chord, position = chord.position, "Result for unknown chord");
            return None;
        };
        if let Some(slot) = entry.slots.get_mut(chord.position) {
            if slot.is_none() {
                entry.remaining -= 1;
            }
            *slot = Some(value);
        }
        if entry.remaining > 0 || entry.body.is_none() {
            return None;
        }
        let body = entry.body.take();
        let values: Vec<Value> = entry
            .slots
            .iter()
            .map(|slot| slot.clone().unwrap_or(Value::Null))
            .collect();
        chords.remove(&chord.chord);
        body.map(|body| (body, values))
    }

    /// Report a member failure.
    ///
    /// Drops the chord and returns the body's pinned result id the first
    /// time, so the caller can fail it; later reports return `None`.
    pub fn fail(&self, chord: ChordRef) -> Option<InvocationId> {
        let mut chords = self.chords.lock();
        let entry = chords.remove(&chord.chord)?;
        Some(entry.body_result_id)
    }

    /// Number of chords with outstanding members.
    pub fn pending(&self) -> usize {
        self.chords.lock().len()
    }
}

impl Default for ChordCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
