//! Local object registry (C3, spec.md §4.3/§4.6): callback targets a remote
//! grain can invoke back into. Held weakly so the registry never keeps a
//! caller-owned object alive (spec.md §9 Design Notes: "implementations
//! with collection use a weak handle" maps directly onto `std::sync::Weak`).

use crate::error::ClientError;
use crate::message::Message;
use crate::identity::GrainId;
use async_trait::async_trait;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

/// Dispatches one inbound message to a resolved local object. Implemented
/// once per callback object type by generated/hand-written glue; kept
/// object-safe via `async_trait` so the registry can hold
/// `Arc<dyn Invoker>` uniformly across object types.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        target: Arc<dyn Any + Send + Sync>,
        msg: Message,
    ) -> Result<Vec<u8>, ClientError>;
}

/// Per-object FIFO queue state, guarded by its own lock (not the registry
/// lock) so that draining one object's queue never blocks registration or
/// lookup of another (spec.md §5 two-lock-scope rule).
pub struct LocalObjectQueueState {
    pub queue: VecDeque<Message>,
    /// `true` while a per-object pump (C6) is actively draining this
    /// queue. Invariant 2: at most one pump runs per object at a time.
    pub running: bool,
}

pub struct LocalObjectData {
    pub grain_id: GrainId,
    pub weak_ref: Weak<dyn Any + Send + Sync>,
    pub invoker: Arc<dyn Invoker>,
    pub inner: Mutex<LocalObjectQueueState>,
}

impl LocalObjectData {
    /// Pushes `msg` onto this object's queue and reports whether the queue
    /// transitioned empty -> non-empty with no pump currently running,
    /// i.e. whether the caller must spawn a fresh per-object pump (C6).
    pub fn enqueue(&self, msg: Message) -> bool {
        let mut state = self.inner.lock().expect("local object queue lock poisoned");
        state.queue.push_back(msg);
        if state.running {
            false
        } else {
            state.running = true;
            true
        }
    }

    /// Pops the next message, or marks the pump as no longer running if
    /// the queue has drained (called by C6 between iterations).
    pub fn dequeue(&self) -> Option<Message> {
        let mut state = self.inner.lock().expect("local object queue lock poisoned");
        match state.queue.pop_front() {
            Some(msg) => Some(msg),
            None => {
                state.running = false;
                None
            }
        }
    }
}

/// `Mutex<HashMap<GrainId, Arc<LocalObjectData>>>` as specified: the
/// registry lock protects only membership, never a per-object queue drain.
#[derive(Clone)]
pub struct LocalObjectRegistry {
    objects: Arc<Mutex<HashMap<GrainId, Arc<LocalObjectData>>>>,
}

impl LocalObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(
        &self,
        grain_id: GrainId,
        weak_ref: Weak<dyn Any + Send + Sync>,
        invoker: Arc<dyn Invoker>,
    ) {
        let data = Arc::new(LocalObjectData {
            grain_id,
            weak_ref,
            invoker,
            inner: Mutex::new(LocalObjectQueueState {
                queue: VecDeque::new(),
                running: false,
            }),
        });
        self.objects
            .lock()
            .expect("local object registry lock poisoned")
            .insert(grain_id, data);
    }

    pub fn unregister(&self, grain_id: GrainId) {
        self.objects
            .lock()
            .expect("local object registry lock poisoned")
            .remove(&grain_id);
    }

    pub fn lookup(&self, grain_id: GrainId) -> Option<Arc<LocalObjectData>> {
        self.objects
            .lock()
            .expect("local object registry lock poisoned")
            .get(&grain_id)
            .cloned()
    }

    /// Resolves a target's weak reference, evicting the registry entry and
    /// logging when the owning object has already been dropped (spec.md
    /// §4.6 GC eviction: "evict + best-effort unregister + drop with
    /// warning").
    pub fn resolve_strong(&self, grain_id: GrainId) -> Result<Arc<dyn Any + Send + Sync>, ClientError> {
        let data = self.lookup(grain_id).ok_or(ClientError::TargetNotFound(grain_id))?;
        match data.weak_ref.upgrade() {
            Some(strong) => Ok(strong),
            None => {
                log::warn!("local object {grain_id:?} was garbage collected, evicting registry entry");
                self.unregister(grain_id);
                Err(ClientError::TargetCollected(grain_id))
            }
        }
    }
}

impl Default for LocalObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
