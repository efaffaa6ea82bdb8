//! Execution contexts and cross-context invocation
//!
//! A context is an affinity domain owned by one thread: native pointers
//! cached for a context are only valid on that thread unless the object is
//! free-threaded. Cross-context work is message passing — the caller
//! submits a job to the owning thread's queue and blocks until it runs, or
//! fails fast with `ContextGone` when the owner no longer exists.
//!
//! The [`ContextId::AMBIENT`] context stands in for threads that never
//! registered an affinity of their own; ambient jobs run inline on any
//! thread.

use crate::{InteropError, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cookie identifying an execution context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// The ambient context: no thread affinity, jobs run inline anywhere.
    pub const AMBIENT: ContextId = ContextId(0);

    /// Allocate a fresh context cookie.
    pub fn new() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric cookie value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the ambient context.
    pub fn is_ambient(self) -> bool {
        self == ContextId::AMBIENT
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// The context the calling thread is registered in, or ambient.
pub fn current_context() -> ContextId {
    CURRENT_CONTEXT.with(|c| c.get()).unwrap_or(ContextId::AMBIENT)
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ContextHandle {
    sender: Sender<Job>,
}

/// Registry of live contexts and the relay between them.
pub struct ContextRegistry {
    contexts: DashMap<ContextId, ContextHandle>,
}

impl ContextRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        ContextRegistry {
            contexts: DashMap::new(),
        }
    }

    /// Register the calling thread as the owner of a fresh context.
    ///
    /// The returned guard must stay on this thread; dropping it (or the
    /// thread exiting with it) deregisters the context and fails all
    /// pending and future relayed jobs with `ContextGone`.
    pub fn register_current(self: &Arc<Self>) -> ContextGuard {
        debug_assert!(
            CURRENT_CONTEXT.with(|c| c.get()).is_none(),
            "thread already owns a context"
        );
        let id = ContextId::new();
        let (sender, receiver) = unbounded();
        self.contexts.insert(id, ContextHandle { sender });
        CURRENT_CONTEXT.with(|c| c.set(Some(id)));
        ContextGuard {
            registry: self.clone(),
            id,
            receiver,
        }
    }

    /// Whether `context` still has a live owner.
    pub fn is_alive(&self, context: ContextId) -> bool {
        context.is_ambient() || self.contexts.contains_key(&context)
    }

    /// Number of registered contexts (ambient excluded).
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Deregister a context without its owner's involvement.
    ///
    /// Pending relayed jobs fail with `ContextGone`.
    pub fn close(&self, context: ContextId) {
        self.contexts.remove(&context);
    }

    /// Run `job` in `target` and return its result.
    ///
    /// Executes inline when the caller already owns `target` or the target
    /// is ambient; otherwise blocks until the owning thread has pumped the
    /// job. There is no cancellation once the job is dispatched.
    pub fn invoke<R, F>(&self, target: ContextId, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if target.is_ambient() || target == current_context() {
            return Ok(job());
        }
        let sender = match self.contexts.get(&target) {
            Some(handle) => handle.sender.clone(),
            None => return Err(InteropError::ContextGone(target)),
        };
        let (done_tx, done_rx) = bounded(1);
        let relayed: Job = Box::new(move || {
            let _ = done_tx.send(job());
        });
        sender
            .send(relayed)
            .map_err(|_| InteropError::ContextGone(target))?;
        // If the owner exits before running the job, the job (and with it
        // the completion sender) is dropped and recv fails.
        done_rx
            .recv()
            .map_err(|_| InteropError::ContextGone(target))
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-side handle for a registered context.
///
/// The owning thread pumps relayed jobs through this guard.
pub struct ContextGuard {
    registry: Arc<ContextRegistry>,
    id: ContextId,
    receiver: Receiver<Job>,
}

impl ContextGuard {
    /// The context this guard owns.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Run all currently queued jobs; returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Run jobs until the context is closed from the outside.
    pub fn run_until_closed(&self) {
        while let Ok(job) = self.receiver.recv() {
            job();
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.registry.close(self.id);
        CURRENT_CONTEXT.with(|c| c.set(None));
    }
}
