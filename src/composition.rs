//! Pipeline composition
//!
//! Deferred invocations and the operators that combine them: sequential
//! chains, parallel groups, and chords (a parallel header plus a finalizer
//! body). Compositions are plain serializable data. The engine interprets
//! them at dispatch time; nothing here touches the queue.

use crate::error::QueueError;
use crate::signature::Signature;
use crate::types::{ChordRef, GroupRef, InvocationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequential composition
///
/// Each step runs after the previous one completes and, unless the step is
/// immutable, receives the previous result prepended to its arguments.
/// A chain may terminate in a chord (`tail`), which keeps sequential
/// composition total over every pipeline shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// Steps in execution order.
    pub steps: Vec<Signature>,
    /// Chord the chain runs into after the last step, if any.
    pub tail: Option<Box<Chord>>,
}

impl Chain {
    pub fn new(steps: Vec<Signature>) -> Self {
        Self { steps, tail: None }
    }
}

/// Parallel composition
///
/// Members are enqueued together with no ordering between them. A bare group
/// is sent with [`Baton::send_group`](crate::app::Baton::send_group); a group
/// that feeds a follow-up task is a [`Chord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Members in slot order. Slot order is preserved in joined results.
    pub members: Vec<Signature>,
}

impl Group {
    pub fn new(members: Vec<Signature>) -> Self {
        Self { members }
    }

    /// Upgrade the group to a chord by attaching a finalizer body.
    pub fn then(self, body: impl Into<Deferred>) -> Chord {
        Chord::new(self.members, body)
    }
}

/// Parallel header plus finalizer
///
/// The body runs once every header member has completed, receiving the
/// header's results as one array argument ordered by member position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    /// Parallel members whose results feed the body.
    pub header: Vec<Signature>,
    /// Finalizer pipeline.
    pub body: Box<Deferred>,
}

impl Chord {
    pub fn new(header: Vec<Signature>, body: impl Into<Deferred>) -> Self {
        Self {
            header,
            body: Box::new(body.into()),
        }
    }
}

/// The shape of a deferred invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeferredKind {
    /// One task call.
    Single(Signature),
    /// Sequential steps.
    Chain(Chain),
    /// Parallel header plus finalizer body.
    Chord(Chord),
}

/// A deferred invocation: work described now, executed later.
///
/// `kind` is the shape of the work. `chord` and `group` record an obligation
/// the surrounding pipeline still owes when this deferred's terminal stage
/// completes: report the terminal result into a chord slot or a group slot.
/// The engine moves these associations, never copies them; exactly one live
/// invocation owes each obligation at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deferred {
    pub kind: DeferredKind,
    pub chord: Option<ChordRef>,
    pub group: Option<GroupRef>,
}

impl Deferred {
    /// A deferred single call.
    pub fn task(signature: Signature) -> Self {
        Self::from_kind(DeferredKind::Single(signature))
    }

    /// A deferred chain of sequential calls.
    pub fn chain(steps: Vec<Signature>) -> Self {
        Self::from_kind(DeferredKind::Chain(Chain::new(steps)))
    }

    /// A deferred chord.
    pub fn chord(header: Vec<Signature>, body: impl Into<Deferred>) -> Self {
        Self::from_kind(DeferredKind::Chord(Chord::new(header, body)))
    }

    fn from_kind(kind: DeferredKind) -> Self {
        Self {
            kind,
            chord: None,
            group: None,
        }
    }

    /// Sequential composition: `self`, then `next`.
    ///
    /// The chord/group obligation of the composed pipeline is `next`'s when
    /// present, otherwise `self`'s; either way it describes the terminal
    /// stage of the combined pipeline.
    pub fn then(self, next: impl Into<Deferred>) -> Deferred {
        let next = next.into();
        let chord = next.chord.or(self.chord);
        let group = next.group.or(self.group);
        Deferred {
            kind: Self::compose(self.kind, next.kind),
            chord,
            group,
        }
    }

    fn compose(first: DeferredKind, second: DeferredKind) -> DeferredKind {
        match (first, second) {
            // Anything composed after a chord extends the chord's body.
            (DeferredKind::Chord(chord), second) => {
                let body = chord.body.then(Self::from_kind(second));
                DeferredKind::Chord(Chord {
                    header: chord.header,
                    body: Box::new(body),
                })
            }
            (DeferredKind::Chain(mut chain), second) => match chain.tail.take() {
                // A chain that already runs into a chord extends that
                // chord's body.
                Some(tail) => {
                    let body = tail.body.then(Self::from_kind(second));
                    chain.tail = Some(Box::new(Chord {
                        header: tail.header,
                        body: Box::new(body),
                    }));
                    DeferredKind::Chain(chain)
                }
                None => match second {
                    DeferredKind::Single(sig) => {
                        chain.steps.push(sig);
                        DeferredKind::Chain(chain)
                    }
                    DeferredKind::Chain(next_chain) => {
                        chain.steps.extend(next_chain.steps);
                        chain.tail = next_chain.tail;
                        DeferredKind::Chain(chain)
                    }
                    DeferredKind::Chord(chord) => {
                        chain.tail = Some(Box::new(chord));
                        DeferredKind::Chain(chain)
                    }
                },
            },
            (DeferredKind::Single(sig), second) => match second {
                DeferredKind::Single(next_sig) => DeferredKind::Chain(Chain {
                    steps: vec![sig, next_sig],
                    tail: None,
                }),
                DeferredKind::Chain(mut next_chain) => {
                    next_chain.steps.insert(0, sig);
                    DeferredKind::Chain(next_chain)
                }
                DeferredKind::Chord(chord) => DeferredKind::Chain(Chain {
                    steps: vec![sig],
                    tail: Some(Box::new(chord)),
                }),
            },
        }
    }

    /// Mark the deferred immutable at its entry stage.
    ///
    /// The entry stage is the head step of a single call or chain, or every
    /// header member of a chord. An immutable entry stage refuses pipeline
    /// result injection. Freezing an already immutable deferred is a no-op.
    pub fn freeze(&mut self) {
        match &mut self.kind {
            DeferredKind::Single(sig) => sig.immutable = true,
            DeferredKind::Chain(chain) => {
                if let Some(first) = chain.steps.first_mut() {
                    first.immutable = true;
                } else if let Some(tail) = &mut chain.tail {
                    for member in &mut tail.header {
                        member.immutable = true;
                    }
                }
            }
            DeferredKind::Chord(chord) => {
                for member in &mut chord.header {
                    member.immutable = true;
                }
            }
        }
    }

    /// Whether the entry stage refuses pipeline result injection.
    pub fn is_immutable(&self) -> bool {
        match &self.kind {
            DeferredKind::Single(sig) => sig.immutable,
            DeferredKind::Chain(chain) => match chain.steps.first() {
                Some(first) => first.immutable,
                None => match &chain.tail {
                    Some(tail) => tail.header.iter().all(|m| m.immutable),
                    None => true,
                },
            },
            DeferredKind::Chord(chord) => chord.header.iter().all(|m| m.immutable),
        }
    }

    /// Attach a chord obligation to the terminal stage.
    pub fn set_chord(&mut self, chord: ChordRef) {
        self.chord = Some(chord);
    }

    /// Attach a group obligation to the terminal stage.
    pub fn set_group(&mut self, group: GroupRef) {
        self.group = Some(group);
    }

    /// Prepend a predecessor's result at the entry stage.
    ///
    /// Immutable entry signatures are skipped. A chord entry injects into
    /// every non-immutable header member.
    pub(crate) fn inject(&mut self, value: Value) {
        match &mut self.kind {
            DeferredKind::Single(sig) => sig.inject(value),
            DeferredKind::Chain(chain) => {
                if let Some(first) = chain.steps.first_mut() {
                    first.inject(value);
                } else if let Some(tail) = &mut chain.tail {
                    for member in &mut tail.header {
                        member.inject(value.clone());
                    }
                }
            }
            DeferredKind::Chord(chord) => {
                for member in &mut chord.header {
                    member.inject(value.clone());
                }
            }
        }
    }

    /// Task name of the first signature that would execute, for logging.
    pub fn entry_task(&self) -> Option<&str> {
        match &self.kind {
            DeferredKind::Single(sig) => Some(sig.task.as_str()),
            DeferredKind::Chain(chain) => chain
                .steps
                .first()
                .map(|s| s.task.as_str())
                .or_else(|| {
                    chain
                        .tail
                        .as_ref()
                        .and_then(|tail| tail.header.first().map(|s| s.task.as_str()))
                }),
            DeferredKind::Chord(chord) => chord
                .header
                .first()
                .map(|s| s.task.as_str())
                .or_else(|| chord.body.entry_task()),
        }
    }

    /// Pin and return the invocation id of the terminal stage.
    ///
    /// The terminal stage is the last chain step, or the body's terminal
    /// stage for a chord. The pinned id survives dispatch, so a caller can
    /// hold a result handle before anything is enqueued.
    pub fn ensure_result_id(&mut self) -> Result<InvocationId, QueueError> {
        match &mut self.kind {
            DeferredKind::Single(sig) => Ok(sig.ensure_task_id()),
            DeferredKind::Chain(chain) => match &mut chain.tail {
                Some(tail) => tail.body.ensure_result_id(),
                None => match chain.steps.last_mut() {
                    Some(last) => Ok(last.ensure_task_id()),
                    None => Err(QueueError::EmptyPipeline),
                },
            },
            DeferredKind::Chord(chord) => chord.body.ensure_result_id(),
        }
    }
}

impl From<Signature> for Deferred {
    fn from(signature: Signature) -> Self {
        Deferred::task(signature)
    }
}

impl From<Chain> for Deferred {
    fn from(chain: Chain) -> Self {
        Deferred::from_kind(DeferredKind::Chain(chain))
    }
}

impl From<Chord> for Deferred {
    fn from(chord: Chord) -> Self {
        Deferred::from_kind(DeferredKind::Chord(chord))
    }
}

impl Signature {
    /// Sequential composition starting from a single call.
    pub fn then(self, next: impl Into<Deferred>) -> Deferred {
        Deferred::from(self).then(next)
    }
}
