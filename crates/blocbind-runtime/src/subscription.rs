//! Per-binding subscription loop.
//!
//! One worker per bound view node consumes its bloc's update stream and
//! routes accepted values to the UI-affine context through the update
//! queue. The loop never finishes on its own:
//!
//! ```text
//! Idle -> Subscribing -> Streaming -> DrainingError -> Subscribing -> ...
//! ```
//!
//! Only external cancellation (node teardown) stops it.
//!
//! # Invariants
//!
//! 1. At most one live loop per binding; the subscription slot is written
//!    through the queue so check and start cannot race.
//! 2. The change filter sees `(previous, value)` per emission; `previous`
//!    advances on every emission, including filtered-out ones, and the
//!    binding-record mirror of it is routed through the queue.
//! 3. A stream error is discarded and the loop resubscribes, re-running
//!    source resolution first. An attempt that fails before yielding any
//!    value backs off briefly so a persistently failing source cannot
//!    spin a core.

use blocbind_core::source::{Bloc, StreamError, UpdatesStep};
use blocbind_core::sync::Shared;

use std::any::type_name;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::binding::BlocBinding;
use crate::queue::OpKey;

/// Bounded wait per stream step; keeps cancellation responsive while the
/// source is quiet.
const STEP_WAIT: Duration = Duration::from_millis(50);

/// Backoff applied after a subscribe attempt that failed before yielding
/// any value.
const FAILFAST_BACKOFF: Duration = Duration::from_millis(10);

/// Observable phase of a subscription loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// No consumer running.
    Idle,
    /// Resolving the source and attaching to its stream.
    Subscribing,
    /// Actively receiving values.
    Streaming,
    /// The stream terminated; about to restart.
    DrainingError,
}

/// Change filter: `(previous, current) -> deliver?`.
pub type StateFilter<S> = Arc<dyn Fn(&S, &S) -> bool + Send + Sync>;

/// Delivery callback, run on the UI-affine context.
pub type StateCallback<S> = Arc<dyn Fn(S) + Send + Sync>;

/// Observability hook reporting each resubscription attempt.
pub type ResubscribeHook = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// One coalescing delivery target fed by the loop.
pub(crate) struct DeliveryChannel<S> {
    /// Stable coalescing identity (per node, per concern).
    pub key: OpKey,
    pub filter: Option<StateFilter<S>>,
    pub deliver: StateCallback<S>,
    /// Whether accepted values refresh the binding's cached snapshot.
    pub update_cache: bool,
}

/// Full loop configuration supplied by the surface wrappers.
pub(crate) struct LoopConfig<S> {
    pub channels: Vec<DeliveryChannel<S>>,
    pub on_resubscribe: Option<ResubscribeHook>,
}

/// Cancellation and observation handle for one subscription loop.
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    restarts: Arc<AtomicU64>,
    phase: Shared<LoopPhase>,
    thread: Shared<Option<JoinHandle<()>>>,
}

impl Clone for SubscriptionHandle {
    fn clone(&self) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            finished: Arc::clone(&self.finished),
            restarts: Arc::clone(&self.restarts),
            phase: self.phase.clone(),
            thread: self.thread.clone(),
        }
    }
}

impl SubscriptionHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            restarts: Arc::new(AtomicU64::new(0)),
            phase: Shared::new(LoopPhase::Idle),
            thread: Shared::new(None),
        }
    }

    /// Request the loop to stop. Takes effect within one stream step.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the loop thread to exit. Call after [`cancel`](Self::cancel)
    /// when teardown must be deterministic.
    pub fn join(&self) {
        if let Some(handle) = self.thread.with_mut(Option::take) {
            let _ = handle.join();
        }
    }

    /// Whether the loop is still running (not cancelled, not exited).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.finished.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Current phase of the loop state machine.
    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        self.phase.get()
    }

    /// Number of resubscription attempts after stream terminations.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: LoopPhase) {
        self.phase.set(phase);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("phase", &self.phase())
            .field("restarts", &self.restarts())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Start the loop for `binding` unless one is already live.
///
/// The subscription slot is checked and written inside a queued operation
/// keyed per node, so concurrent starts collapse to one loop.
pub(crate) fn ensure_started<B: Bloc>(binding: &BlocBinding<B>, config: LoopConfig<B::State>) {
    if binding.is_subscribed() {
        return;
    }
    let owner = binding.clone();
    let epoch = binding.state.with(|s| s.epoch);
    binding.queue().schedule(binding.stream_key, move || {
        // A dispose between scheduling and flush bumps the epoch; starting
        // now would leak a loop the node can no longer cancel.
        let stale = owner
            .state
            .with(|s| s.epoch != epoch || s.subscription.as_ref().is_some_and(SubscriptionHandle::is_active));
        if stale {
            return;
        }
        let handle = spawn(owner.clone(), config);
        owner.state.with_mut(|s| s.subscription = Some(handle));
    });
}

fn spawn<B: Bloc>(binding: BlocBinding<B>, config: LoopConfig<B::State>) -> SubscriptionHandle {
    let handle = SubscriptionHandle::new();
    let worker = handle.clone();
    let join = thread::Builder::new()
        .name("blocbind-subscription".into())
        .spawn(move || run_loop(binding, config, worker))
        .expect("failed to spawn subscription thread");
    handle.thread.set(Some(join));
    handle
}

fn run_loop<B: Bloc>(
    binding: BlocBinding<B>,
    config: LoopConfig<B::State>,
    handle: SubscriptionHandle,
) {
    'attach: while !handle.is_cancelled() {
        handle.set_phase(LoopPhase::Subscribing);

        // Re-resolve each attempt: the previously bound source may be gone.
        let bloc = match binding.bloc() {
            Ok(bloc) => bloc,
            Err(err) => {
                tracing::warn!(error = %err, "subscription loop lost its bloc; stopping");
                break 'attach;
            }
        };
        let mut previous = binding.previous_or_live(&bloc);
        let updates = bloc.updates();
        handle.set_phase(LoopPhase::Streaming);

        let mut yielded = false;
        let failure = loop {
            if handle.is_cancelled() {
                break 'attach;
            }
            match updates.next(STEP_WAIT) {
                UpdatesStep::Idle => {}
                UpdatesStep::Value(value) => {
                    yielded = true;
                    deliver(&binding, &config, &previous, &value);
                    previous = value;
                }
                UpdatesStep::Failed(error) => break error,
                UpdatesStep::Closed => break StreamError::new("update stream closed"),
            }
        };

        handle.set_phase(LoopPhase::DrainingError);
        handle.restarts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            error = %failure,
            bloc = type_name::<B>(),
            "bloc stream terminated; resubscribing"
        );
        if let Some(hook) = &config.on_resubscribe {
            hook(&failure);
        }
        if !yielded {
            thread::sleep(FAILFAST_BACKOFF);
        }
    }

    handle.set_phase(LoopPhase::Idle);
    handle.finished.store(true, Ordering::SeqCst);
}

fn deliver<B: Bloc>(
    binding: &BlocBinding<B>,
    config: &LoopConfig<B::State>,
    previous: &B::State,
    value: &B::State,
) {
    for channel in &config.channels {
        let accepted = channel
            .filter
            .as_ref()
            .is_none_or(|accept| accept(previous, value));
        if !accepted {
            continue;
        }

        let record = binding.state.clone();
        let callback = Arc::clone(&channel.deliver);
        let update_cache = channel.update_cache;
        let delivered = value.clone();
        binding.queue().schedule(channel.key, move || {
            if update_cache {
                record.with_mut(|s| s.cached = Some(delivered.clone()));
            }
            callback(delivered);
        });
    }

    // The previous-state mirror advances on every emission, accepted or not.
    let record = binding.state.clone();
    let latest = value.clone();
    binding.queue().schedule(binding.previous_key, move || {
        record.with_mut(|s| s.previous = Some(latest));
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ChannelDispatcher, InlineDispatcher};
    use crate::queue::UpdateQueue;
    use blocbind_core::context::BlocContext;
    use blocbind_core::cubit::Cubit;
    use std::time::Instant;

    fn empty_config() -> LoopConfig<i32> {
        LoopConfig {
            channels: Vec::new(),
            on_resubscribe: None,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "condition not reached in time"
            );
            std::thread::yield_now();
        }
    }

    #[test]
    fn unresolvable_source_ends_the_loop() {
        let binding = BlocBinding::<Cubit<i32>>::new(
            BlocContext::new(),
            UpdateQueue::new(Arc::new(InlineDispatcher)),
        );
        ensure_started(&binding, empty_config());

        let handle = binding.subscription().unwrap();
        wait_until(|| !handle.is_active());
        handle.join();
        assert_eq!(handle.phase(), LoopPhase::Idle);
        assert!(!binding.is_subscribed());
    }

    #[test]
    fn cancel_stops_a_streaming_loop_within_one_step() {
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(0));
        let binding =
            BlocBinding::<Cubit<i32>>::new(ctx, UpdateQueue::new(Arc::new(InlineDispatcher)));
        ensure_started(&binding, empty_config());

        let handle = binding.subscription().unwrap();
        wait_until(|| handle.phase() == LoopPhase::Streaming);

        handle.cancel();
        handle.join();
        assert_eq!(handle.phase(), LoopPhase::Idle);
        assert!(!handle.is_active());
        assert_eq!(handle.restarts(), 0);
    }

    #[test]
    fn start_queued_before_dispose_never_spawns() {
        let dispatcher = Arc::new(ChannelDispatcher::new());
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(0));
        let binding =
            BlocBinding::<Cubit<i32>>::new(ctx.clone(), UpdateQueue::new(dispatcher.clone()));

        // The start op sits in the dispatcher until the UI loop drains it.
        ensure_started(&binding, empty_config());
        assert!(!binding.is_subscribed());

        // Node teardown lands before the flush.
        binding.dispose();
        dispatcher.run_pending();

        assert!(!binding.is_subscribed());
        assert!(binding.subscription().is_none());
        assert_eq!(ctx.read::<Cubit<i32>>().unwrap().subscriber_count(), 0);
    }

    #[test]
    fn start_is_a_no_op_while_a_loop_is_live() {
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(0));
        let binding =
            BlocBinding::<Cubit<i32>>::new(ctx, UpdateQueue::new(Arc::new(InlineDispatcher)));

        ensure_started(&binding, empty_config());
        let first = binding.subscription().unwrap();
        wait_until(|| first.phase() == LoopPhase::Streaming);

        ensure_started(&binding, empty_config());
        // Still exactly one loop: the slot holds the original handle.
        assert!(binding.subscription().unwrap().is_active());
        assert_eq!(
            binding.bloc().unwrap().subscriber_count(),
            1,
            "a second loop would have opened a second stream"
        );

        first.cancel();
        first.join();
    }
}
