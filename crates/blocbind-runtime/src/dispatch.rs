//! The UI-affine execution seam.
//!
//! All visible binding state mutates on one designated execution context
//! supplied by the embedding framework. The engine only ever posts jobs
//! through [`MainDispatcher`]; it never assumes which thread that is.
//!
//! Two stock dispatchers ship:
//!
//! - [`InlineDispatcher`] runs each job immediately on the posting thread.
//!   Suitable for single-threaded embeddings and tests.
//! - [`ChannelDispatcher`] queues jobs; the owning UI loop drains them
//!   with [`run_pending`](ChannelDispatcher::run_pending).

use std::sync::Mutex;
use std::sync::mpsc;

/// A unit of work destined for the UI-affine context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Posts jobs onto the designated UI-affine execution context.
pub trait MainDispatcher: Send + Sync + 'static {
    /// Enqueue `job`. Implementations must eventually run every posted job
    /// on the UI-affine context, in posting order.
    fn post(&self, job: Job);
}

/// Runs every job synchronously on the posting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl MainDispatcher for InlineDispatcher {
    fn post(&self, job: Job) {
        job();
    }
}

/// Queues jobs for an owning loop to drain.
///
/// `post` is callable from any thread. The UI loop calls
/// [`run_pending`](Self::run_pending) once per tick; jobs must not
/// re-enter `run_pending`.
pub struct ChannelDispatcher {
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelDispatcher {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Run every currently queued job, including jobs posted by the jobs
    /// themselves. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Hold the receiver lock only for the dequeue; jobs may post.
            let job = {
                let rx = self.rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                rx.try_recv()
            };
            match job {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(_) => return ran,
            }
        }
    }
}

impl MainDispatcher for ChannelDispatcher {
    fn post(&self, job: Job) {
        // A dropped receiver means the UI loop is gone; the job is moot.
        let _ = self.tx.send(job);
    }
}

impl std::fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDispatcher").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
