//! Deduplicating, ordered update queue.
//!
//! [`UpdateQueue`] coalesces pending UI-snapshot mutations by an opaque
//! [`OpKey`] and flushes them on the UI-affine dispatcher. Scheduling under
//! a key that is already pending replaces the stored operation
//! (last-write-wins) without adding a second stack entry; at most one flush
//! is in flight at a time.
//!
//! # Ordering
//!
//! Within one flush, operations run in reverse order of first submission:
//! a LIFO sweep of the pending stack that continues until the stack is
//! empty, so operations scheduled *during* the flush drain before the flush
//! returns. Recency-biased by design; there is no ordering guarantee
//! across keys beyond this.
//!
//! # Concurrency
//!
//! `schedule` is callable from any thread. The internal mutex is held only
//! to mutate the stack and operation map, never while an operation body
//! runs, so operations may themselves call `schedule` without deadlocking.
//!
//! # Invariants
//!
//! 1. Every key on the stack has exactly one stored operation, and vice
//!    versa.
//! 2. `flushing` is true iff a flush job is posted or running.
//! 3. Each scheduled key is applied exactly once per flush cycle, with the
//!    most recently stored body.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;

use crate::dispatch::MainDispatcher;

/// Opaque, process-unique coalescing identity.
///
/// Allocate one per node and per concern, and keep it stable for the life
/// of that coalescing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey(u64);

impl OpKey {
    /// Allocate a fresh key.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Operation = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    /// Pending keys, oldest first; flushed by popping the back.
    stack: Vec<OpKey>,
    operations: AHashMap<OpKey, Operation>,
    flushing: bool,
}

/// Deduplicating LIFO work queue flushed on the UI-affine dispatcher.
///
/// Clones are handles to the same queue. Queues are explicit instances:
/// construct one per runtime and pass it to every binding.
pub struct UpdateQueue {
    state: Arc<Mutex<QueueState>>,
    dispatcher: Arc<dyn MainDispatcher>,
}

impl Clone for UpdateQueue {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl UpdateQueue {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn MainDispatcher>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                stack: Vec::new(),
                operations: AHashMap::new(),
                flushing: false,
            })),
            dispatcher,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // Operation bodies run outside the lock, so a panicking body cannot
        // poison queue state mid-mutation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Coalesce `op` under `key` and ensure a flush is in flight.
    ///
    /// If `key` is already pending, `op` replaces the stored body and the
    /// key keeps its stack position.
    pub fn schedule(&self, key: OpKey, op: impl FnOnce() + Send + 'static) {
        let start_flush = {
            let mut state = self.lock();
            if state.operations.insert(key, Box::new(op)).is_none() {
                state.stack.push(key);
            } else {
                tracing::trace!(?key, "coalesced pending update");
            }
            if state.flushing {
                false
            } else {
                state.flushing = true;
                true
            }
        };

        if start_flush {
            let queue = self.clone();
            self.dispatcher.post(Box::new(move || queue.flush()));
        }
    }

    /// Drain the pending stack, most recent key first, until empty.
    fn flush(&self) {
        let mut applied = 0usize;
        loop {
            let op = {
                let mut state = self.lock();
                let Some(key) = state.stack.pop() else {
                    state.flushing = false;
                    break;
                };
                state.operations.remove(&key)
            };
            if let Some(op) = op {
                op();
                applied += 1;
            }
        }
        tracing::trace!(applied, "flushed update queue");
    }

    /// Number of keys currently pending.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().stack.len()
    }
}

impl std::fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("UpdateQueue")
            .field("pending", &state.stack.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ChannelDispatcher, InlineDispatcher};
    use std::sync::Mutex as StdMutex;

    fn deferred() -> (UpdateQueue, Arc<ChannelDispatcher>) {
        let dispatcher = Arc::new(ChannelDispatcher::new());
        (UpdateQueue::new(dispatcher.clone()), dispatcher)
    }

    fn log() -> (Arc<StdMutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let entries = Arc::new(StdMutex::new(Vec::new()));
        let sink = entries.clone();
        (entries, move |entry| sink.lock().unwrap().push(entry))
    }

    #[test]
    fn same_key_applies_once_with_last_body() {
        let (queue, dispatcher) = deferred();
        let (entries, push) = log();
        let key = OpKey::next();

        let p = push.clone();
        queue.schedule(key, move || p("first"));
        let p = push;
        queue.schedule(key, move || p("second"));

        dispatcher.run_pending();
        assert_eq!(*entries.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn distinct_keys_flush_lifo() {
        let (queue, dispatcher) = deferred();
        let (entries, push) = log();

        for name in ["a", "b", "c"] {
            let p = push.clone();
            queue.schedule(OpKey::next(), move || p(name));
        }

        dispatcher.run_pending();
        assert_eq!(*entries.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn replacement_keeps_stack_position() {
        let (queue, dispatcher) = deferred();
        let (entries, push) = log();
        let a = OpKey::next();
        let b = OpKey::next();

        let p = push.clone();
        queue.schedule(a, move || p("a-old"));
        let p = push.clone();
        queue.schedule(b, move || p("b"));
        // Rescheduling `a` must not move it above `b`.
        let p = push;
        queue.schedule(a, move || p("a-new"));

        dispatcher.run_pending();
        assert_eq!(*entries.lock().unwrap(), vec!["b", "a-new"]);
    }

    #[test]
    fn reentrant_schedule_drains_before_flush_returns() {
        let (queue, dispatcher) = deferred();
        let (entries, push) = log();

        let inner_queue = queue.clone();
        let p = push.clone();
        let inner_push = push;
        queue.schedule(OpKey::next(), move || {
            p("outer");
            inner_queue.schedule(OpKey::next(), move || inner_push("inner"));
        });

        // One posted flush job drains both.
        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(*entries.lock().unwrap(), vec!["outer", "inner"]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn single_flush_job_for_many_schedules() {
        let (queue, dispatcher) = deferred();
        for _ in 0..10 {
            queue.schedule(OpKey::next(), || {});
        }
        // Only the first schedule posts a flush.
        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn inline_dispatcher_flushes_synchronously() {
        let queue = UpdateQueue::new(Arc::new(InlineDispatcher));
        let (entries, push) = log();
        queue.schedule(OpKey::next(), move || push("ran"));
        assert_eq!(*entries.lock().unwrap(), vec!["ran"]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn schedule_from_many_threads_applies_each_key_once() {
        let (queue, dispatcher) = deferred();
        let counter = Arc::new(StdMutex::new(0usize));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let queue = queue.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    queue.schedule(OpKey::next(), move || {
                        *counter.lock().unwrap() += 1;
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        dispatcher.run_pending();
        assert_eq!(*counter.lock().unwrap(), 16);
    }
}
