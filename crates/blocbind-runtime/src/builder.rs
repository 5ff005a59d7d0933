//! Rebuild surface: keep a node's state snapshot current and tell the
//! embedder to re-render.

use blocbind_core::source::Bloc;

use std::sync::Arc;

use crate::binding::{BindingError, BlocBinding};
use crate::queue::OpKey;
use crate::subscription::{
    self, DeliveryChannel, LoopConfig, ResubscribeHook, StateCallback, StateFilter,
};

/// Drives a rebuild callback and the binding's cached snapshot from a
/// bloc's update stream.
///
/// Each accepted state first refreshes the cached snapshot, then invokes
/// the rebuild callback, so a synchronous
/// [`snapshot`](Self::snapshot) call from inside the callback sees the
/// state being built.
pub struct BlocBuilder<B: Bloc> {
    binding: BlocBinding<B>,
    rebuild: StateCallback<B::State>,
    build_when: Option<StateFilter<B::State>>,
    on_resubscribe: Option<ResubscribeHook>,
    build_key: OpKey,
}

impl<B: Bloc> BlocBuilder<B> {
    pub fn new(binding: BlocBinding<B>, rebuild: impl Fn(B::State) + Send + Sync + 'static) -> Self {
        Self {
            binding,
            rebuild: Arc::new(rebuild),
            build_when: None,
            on_resubscribe: None,
            build_key: OpKey::next(),
        }
    }

    /// Only rebuild for states where `accept(previous, current)` is true.
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

    /// Node-creation hook: start the subscription loop (no-op if live).
    pub fn attach(&self) {
        let config = LoopConfig {
            channels: vec![DeliveryChannel {
                key: self.build_key,
                filter: self.build_when.clone(),
                deliver: Arc::clone(&self.rebuild),
                update_cache: true,
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
