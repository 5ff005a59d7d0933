//! Per-view-node binding record and source resolution.
//!
//! A [`BlocBinding`] tracks, for one view node, which bloc it reads from
//! and the last state it saw. Resolution precedence:
//!
//! 1. a caller-supplied constant bloc — always wins, never re-resolved;
//! 2. the cached weak handle, while it still resolves;
//! 3. a fresh [`BlocContext`] lookup — the new handle is cached (and any
//!    cached state reset, since switching sources invalidates it) through
//!    the update queue, so the cache write itself lands on the UI-affine
//!    context.
//!
//! A failed lookup is a typed [`BindingError`]: the node was rendered
//! without its dependency registered. The embedder decides whether that
//! aborts.
//!
//! All mutation of the record flows through the queue except
//! [`dispose`](BlocBinding::dispose), which must take effect immediately
//! at node teardown.

use blocbind_core::context::{BlocContext, ContextError};
use blocbind_core::source::Bloc;
use blocbind_core::sync::Shared;
use blocbind_core::weak::WeakBloc;

use std::any::type_name;
use std::sync::Arc;

use thiserror::Error;

use crate::queue::{OpKey, UpdateQueue};
use crate::subscription::SubscriptionHandle;

/// Binding failure. The only failure this engine surfaces: a view node
/// requires a source that was never registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error(transparent)]
    Context(#[from] ContextError),
}

pub(crate) struct BindingState<B: Bloc> {
    pub(crate) source: Option<WeakBloc<B>>,
    pub(crate) cached: Option<B::State>,
    pub(crate) previous: Option<B::State>,
    pub(crate) subscription: Option<SubscriptionHandle>,
    /// Bumped by `dispose`. A queued subscription start captured under an
    /// older epoch must not spawn.
    pub(crate) epoch: u64,
}

impl<B: Bloc> Default for BindingState<B> {
    fn default() -> Self {
        Self {
            source: None,
            cached: None,
            previous: None,
            subscription: None,
            epoch: 0,
        }
    }
}

/// Per-view-node binding to a bloc of type `B`.
///
/// Clones share the record; the subscription loop holds one across
/// threads.
pub struct BlocBinding<B: Bloc> {
    context: BlocContext,
    queue: UpdateQueue,
    constant: Option<Arc<B>>,
    pub(crate) state: Shared<BindingState<B>>,
    /// Coalescing identity for source-cache writes.
    source_key: OpKey,
    /// Coalescing identity for state-snapshot cache writes.
    snapshot_key: OpKey,
    /// Coalescing identity for subscription-slot writes.
    pub(crate) stream_key: OpKey,
    /// Coalescing identity for previous-state writes.
    pub(crate) previous_key: OpKey,
}

impl<B: Bloc> Clone for BlocBinding<B> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            queue: self.queue.clone(),
            constant: self.constant.clone(),
            state: self.state.clone(),
            source_key: self.source_key,
            snapshot_key: self.snapshot_key,
            stream_key: self.stream_key,
            previous_key: self.previous_key,
        }
    }
}

impl<B: Bloc> BlocBinding<B> {
    /// Binding that resolves its bloc through `context`.
    #[must_use]
    pub fn new(context: BlocContext, queue: UpdateQueue) -> Self {
        Self::build(context, queue, None)
    }

    /// Binding over a caller-supplied constant bloc. The registry is never
    /// consulted, even when a registration for `B` exists.
    #[must_use]
    pub fn with_constant(context: BlocContext, queue: UpdateQueue, bloc: Arc<B>) -> Self {
        Self::build(context, queue, Some(bloc))
    }

    fn build(context: BlocContext, queue: UpdateQueue, constant: Option<Arc<B>>) -> Self {
        Self {
            context,
            queue,
            constant,
            state: Shared::new(BindingState::default()),
            source_key: OpKey::next(),
            snapshot_key: OpKey::next(),
            stream_key: OpKey::next(),
            previous_key: OpKey::next(),
        }
    }

    pub(crate) fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    /// Produce a live bloc per the resolution precedence.
    pub fn bloc(&self) -> Result<Arc<B>, BindingError> {
        if let Some(constant) = &self.constant {
            return Ok(Arc::clone(constant));
        }

        if let Some(live) = self
            .state
            .with(|s| s.source.as_ref().and_then(WeakBloc::resolve))
        {
            return Ok(live);
        }

        let resolved = self.context.read::<B>()?;
        tracing::debug!(bloc = type_name::<B>(), "binding resolved bloc via registry");

        let weak = WeakBloc::new(&resolved);
        let record = self.state.clone();
        self.queue.schedule(self.source_key, move || {
            record.with_mut(|s| {
                s.cached = None;
                s.previous = None;
                s.source = Some(weak);
            });
        });
        Ok(resolved)
    }

    /// Current state snapshot: the cached value if present, otherwise the
    /// bloc's live state (with the cache write scheduled).
    pub fn snapshot(&self) -> Result<B::State, BindingError> {
        if let Some(cached) = self.state.with(|s| s.cached.clone()) {
            return Ok(cached);
        }

        let current = self.bloc()?.state();
        let record = self.state.clone();
        let value = current.clone();
        self.queue.schedule(self.snapshot_key, move || {
            record.with_mut(|s| {
                // A delivery may have landed first; keep the newer value.
                if s.cached.is_none() {
                    s.cached = Some(value);
                }
            });
        });
        Ok(current)
    }

    /// Last state that passed through the change filter, falling back to
    /// the live state on first access.
    pub(crate) fn previous_or_live(&self, bloc: &Arc<B>) -> B::State {
        self.state
            .with(|s| s.previous.clone())
            .unwrap_or_else(|| bloc.state())
    }

    /// Whether a live subscription loop exists for this node.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state.with(|s| {
            s.subscription
                .as_ref()
                .is_some_and(SubscriptionHandle::is_active)
        })
    }

    /// Observe the active subscription, if any.
    #[must_use]
    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        self.state.with(|s| s.subscription.clone())
    }

    /// Node-teardown hook: cancel the active subscription and drop all
    /// cached binding state. Takes effect immediately, not via the queue;
    /// the epoch bump invalidates any start op still waiting in the queue.
    pub fn dispose(&self) {
        let subscription = self.state.with_mut(|s| {
            s.source = None;
            s.cached = None;
            s.previous = None;
            s.epoch += 1;
            s.subscription.take()
        });
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<B: Bloc> std::fmt::Debug for BlocBinding<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocBinding")
            .field("bloc", &type_name::<B>())
            .field("constant", &self.constant.is_some())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
