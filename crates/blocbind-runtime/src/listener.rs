//! Side-effect surface: run a callback per accepted state.

use blocbind_core::source::Bloc;

use std::sync::Arc;

use crate::binding::BlocBinding;
use crate::queue::OpKey;
use crate::subscription::{
    self, DeliveryChannel, LoopConfig, ResubscribeHook, StateCallback, StateFilter,
};

/// Invokes a callback for every state the change filter accepts.
///
/// The callback runs on the UI-affine context and never refreshes the
/// binding's cached snapshot; use [`BlocBuilder`](crate::builder::BlocBuilder)
/// when the node's rendered state should track deliveries.
pub struct BlocListener<B: Bloc> {
    binding: BlocBinding<B>,
    callback: StateCallback<B::State>,
    listen_when: Option<StateFilter<B::State>>,
    on_resubscribe: Option<ResubscribeHook>,
    listen_key: OpKey,
}

impl<B: Bloc> BlocListener<B> {
    pub fn new(binding: BlocBinding<B>, callback: impl Fn(B::State) + Send + Sync + 'static) -> Self {
        Self {
            binding,
            callback: Arc::new(callback),
            listen_when: None,
            on_resubscribe: None,
            listen_key: OpKey::next(),
        }
    }

    /// Only deliver states for which `accept(previous, current)` is true.
    /// The previous state still advances on rejected emissions.
    #[must_use]
    pub fn listen_when(mut self, accept: impl Fn(&B::State, &B::State) -> bool + Send + Sync + 'static) -> Self {
        self.listen_when = Some(Arc::new(accept));
        self
    }

    /// Observe each resubscription attempt after a stream error.
    #[must_use]
    pub fn on_resubscribe(mut self, hook: ResubscribeHook) -> Self {
        self.on_resubscribe = Some(hook);
        self
    }

    /// Node-creation hook: start the subscription loop (no-op if live).
    pub fn attach(&self) {
        let config = LoopConfig {
            channels: vec![DeliveryChannel {
                key: self.listen_key,
                filter: self.listen_when.clone(),
                deliver: Arc::clone(&self.callback),
                update_cache: false,
            }],
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
