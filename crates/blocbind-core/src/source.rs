//! The observable-source ("bloc") contract.
//!
//! A bloc is a long-lived object exposing a synchronous snapshot of its
//! current state plus a stream of subsequent states. The binding engine only
//! ever observes blocs; it never creates, mutates, or destroys them.
//!
//! # Stream contract
//!
//! - Every call to [`Bloc::updates`] yields an independent subscriber that
//!   observes the same logical sequence of states from that point on.
//! - A stream may terminate with a [`StreamError`]. After termination a
//!   fresh subscription must be obtainable from the same bloc.
//! - Streams are logically infinite; consumers poll with a bounded wait so
//!   cancellation stays responsive while a source is quiet.

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

/// Error carried by a terminated update stream.
///
/// Stream errors are recovered locally by resubscription and never surface
/// to binding callers; the payload exists for logging and restart hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    message: String,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One step of consuming an update stream.
#[derive(Debug)]
pub enum UpdatesStep<S> {
    /// The source emitted a new state.
    Value(S),
    /// The stream terminated with an error. No further values arrive on
    /// this subscriber; obtain a fresh one via [`Bloc::updates`].
    Failed(StreamError),
    /// No value arrived within the wait window.
    Idle,
    /// The source itself is gone; the subscriber will never yield again.
    Closed,
}

/// A single subscriber's view of a bloc's update stream.
pub struct Updates<S> {
    rx: mpsc::Receiver<Result<S, StreamError>>,
}

impl<S> Updates<S> {
    /// Wrap a receiver carrying `Ok(state)` values and a final `Err` on
    /// stream failure. Source implementations use this to hand out
    /// subscribers.
    pub fn new(rx: mpsc::Receiver<Result<S, StreamError>>) -> Self {
        Self { rx }
    }

    /// Wait up to `wait` for the next stream step.
    pub fn next(&self, wait: Duration) -> UpdatesStep<S> {
        match self.rx.recv_timeout(wait) {
            Ok(Ok(state)) => UpdatesStep::Value(state),
            Ok(Err(error)) => UpdatesStep::Failed(error),
            Err(mpsc::RecvTimeoutError::Timeout) => UpdatesStep::Idle,
            Err(mpsc::RecvTimeoutError::Disconnected) => UpdatesStep::Closed,
        }
    }
}

impl<S> std::fmt::Debug for Updates<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updates").finish_non_exhaustive()
    }
}

/// Long-lived observable state source.
pub trait Bloc: Send + Sync + 'static {
    /// The state type this source publishes.
    type State: Clone + Send + 'static;

    /// Synchronous snapshot of the current state.
    fn state(&self) -> Self::State;

    /// Subscribe to subsequent states. Each call returns an independent
    /// subscriber; the returned stream does not include the current state.
    fn updates(&self) -> Updates<Self::State>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
