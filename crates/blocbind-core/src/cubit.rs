//! Reference [`Bloc`] implementation: a current value plus `emit`/`fail`.
//!
//! `Cubit` exists so registry factories and embedders have a concrete
//! source to hand to the binding engine; the engine itself only ever sees
//! it through the [`Bloc`] trait.
//!
//! # Fan-out
//!
//! Each subscriber gets its own channel. `emit` updates the stored state
//! and forwards the new value to every live subscriber, pruning the ones
//! whose receivers were dropped. `fail` terminates every current
//! subscriber with the given error; later [`updates`](Bloc::updates) calls
//! start fresh streams.
//!
//! `emit` never suppresses equal states: change filtering is the binding
//! engine's job, not the source's.

use std::sync::mpsc;

use crate::source::{Bloc, StreamError, Updates};
use crate::sync::Shared;

struct CubitInner<S> {
    state: S,
    subscribers: Vec<mpsc::Sender<Result<S, StreamError>>>,
}

/// Observable value cell with broadcast updates.
pub struct Cubit<S> {
    inner: Shared<CubitInner<S>>,
}

impl<S: Clone + Send + 'static> Cubit<S> {
    /// Create a cubit holding `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            inner: Shared::new(CubitInner {
                state: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Publish a new state to the cell and every live subscriber.
    pub fn emit(&self, next: S) {
        self.inner.with_mut(|inner| {
            inner.state = next.clone();
            inner
                .subscribers
                .retain(|tx| tx.send(Ok(next.clone())).is_ok());
        });
    }

    /// Terminate every current subscriber's stream with `error`.
    ///
    /// The stored state is untouched; new subscriptions start clean.
    pub fn fail(&self, error: StreamError) {
        self.inner.with_mut(|inner| {
            for tx in inner.subscribers.drain(..) {
                let _ = tx.send(Err(error.clone()));
            }
        });
    }

    /// Number of live subscribers (dead ones are pruned lazily on `emit`).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.with(|inner| inner.subscribers.len())
    }
}

impl<S: Clone + Send + 'static> Bloc for Cubit<S> {
    type State = S;

    fn state(&self) -> S {
        self.inner.with(|inner| inner.state.clone())
    }

    fn updates(&self) -> Updates<S> {
        let (tx, rx) = mpsc::channel();
        self.inner.with_mut(|inner| inner.subscribers.push(tx));
        Updates::new(rx)
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Cubit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.with(|inner| {
            f.debug_struct("Cubit")
                .field("state", &inner.state)
                .field("subscribers", &inner.subscribers.len())
                .finish()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
