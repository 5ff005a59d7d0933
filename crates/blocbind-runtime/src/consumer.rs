//! Combined listener + builder surface over one subscription loop.

use blocbind_core::source::Bloc;

use std::sync::Arc;

use crate::binding::{BindingError, BlocBinding};
use crate::queue::OpKey;
use crate::subscription::{
    self, DeliveryChannel, LoopConfig, ResubscribeHook, StateCallback, StateFilter,
};

/// Feeds a side-effect listener and a rebuild callback from a single
/// subscription, each behind its own change filter.
///
/// Both concerns share one stream, so an emission is observed exactly once
/// and the two filters see the same `(previous, current)` pair. Relative
/// ordering of the two callbacks for one emission follows queue flush
/// policy.
pub struct BlocConsumer<B: Bloc> {
    binding: BlocBinding<B>,
    listener: StateCallback<B::State>,
    rebuild: StateCallback<B::State>,
    listen_when: Option<StateFilter<B::State>>,
    build_when: Option<StateFilter<B::State>>,
    on_resubscribe: Option<ResubscribeHook>,
    listen_key: OpKey,
    build_key: OpKey,
}

impl<B: Bloc> BlocConsumer<B> {
    pub fn new(
        binding: BlocBinding<B>,
        listener: impl Fn(B::State) + Send + Sync + 'static,
        rebuild: impl Fn(B::State) + Send + Sync + 'static,
    ) -> Self {
        Self {
            binding,
            listener: Arc::new(listener),
            rebuild: Arc::new(rebuild),
            listen_when: None,
            build_when: None,
            on_resubscribe: None,
            listen_key: OpKey::next(),
            build_key: OpKey::next(),
        }
    }

    /// Gate the side-effect listener.
    #[must_use]
    pub fn listen_when(mut self, accept: impl Fn(&B::State, &B::State) -> bool + Send + Sync + 'static) -> Self {
        self.listen_when = Some(Arc::new(accept));
        self
    }

    /// Gate the rebuild callback.
    #[must_use]
    pub fn build_when(mut self, accept: impl Fn(&B::State, &B::State) -> bool + Send + Sync + 'static) -> Self {
        self.build_when = Some(Arc::new(accept));
        self
    }

    /// Observe each resubscription attempt after a stream error.
    #[must_use]
    pub fn on_resubscribe(mut self, hook: ResubscribeHook) -> Self {
        self.on_resubscribe = Some(hook);
        self
    }

    /// Current state for rendering: cached if present, else live.
    pub fn snapshot(&self) -> Result<B::State, BindingError> {
        self.binding.snapshot()
    }

    /// Node-creation hook: start the shared subscription loop.
    pub fn attach(&self) {
        let config = LoopConfig {
            channels: vec![
                DeliveryChannel {
                    key: self.listen_key,
                    filter: self.listen_when.clone(),
                    deliver: Arc::clone(&self.listener),
                    update_cache: false,
                },
                DeliveryChannel {
                    key: self.build_key,
                    filter: self.build_when.clone(),
                    deliver: Arc::clone(&self.rebuild),
                    update_cache: true,
                },
            ],
            on_resubscribe: self.on_resubscribe.clone(),
        };
        subscription::ensure_started(&self.binding, config);
    }

    /// Node-teardown hook: cancel the loop and drop cached state.
    pub fn detach(&self) {
        self.binding.dispose();
    }

    #[must_use]
    pub fn binding(&self) -> &BlocBinding<B> {
        &self.binding
    }
}
