//! Change-filtered projection over a bloc's state.

use blocbind_core::source::Bloc;
use blocbind_core::sync::Shared;

use std::sync::Arc;

use crate::binding::BlocBinding;
use crate::queue::OpKey;
use crate::subscription::{self, DeliveryChannel, LoopConfig};

/// Projects each state to a value `T` and delivers it only when it differs
/// from the last delivered projection (distinct-until-changed, structural
/// equality).
///
/// The gate starts unseeded: the first emission is always delivered, even
/// when its projection equals the bloc's initial state.
pub struct BlocSelector<B: Bloc, T> {
    binding: BlocBinding<B>,
    select: Arc<dyn Fn(&B::State) -> T + Send + Sync>,
    deliver: Arc<dyn Fn(T) + Send + Sync>,
    last: Shared<Option<T>>,
    select_key: OpKey,
}

impl<B, T> BlocSelector<B, T>
where
    B: Bloc,
    T: PartialEq + Send + 'static,
{
    pub fn new(
        binding: BlocBinding<B>,
        select: impl Fn(&B::State) -> T + Send + Sync + 'static,
        deliver: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            binding,
            select: Arc::new(select),
            deliver: Arc::new(deliver),
            last: Shared::new(None),
            select_key: OpKey::next(),
        }
    }

    /// Node-creation hook: start the subscription loop (no-op if live).
    pub fn attach(&self) {
        let gate_select = Arc::clone(&self.select);
        let gate = self.last.clone();
        // The gate advances exactly when it accepts, so equal projections
        // collapse no matter how many raw emissions produced them.
        let filter = move |_previous: &B::State, current: &B::State| {
            let projected = gate_select(current);
            gate.with_mut(|last| {
                if last.as_ref() == Some(&projected) {
                    false
                } else {
                    *last = Some(projected);
                    true
                }
            })
        };

        let deliver_select = Arc::clone(&self.select);
        let deliver = Arc::clone(&self.deliver);
        let config = LoopConfig {
            channels: vec![DeliveryChannel {
                key: self.select_key,
                filter: Some(Arc::new(filter)),
                deliver: Arc::new(move |state: B::State| deliver(deliver_select(&state))),
                update_cache: false,
            }],
            on_resubscribe: None,
        };
        subscription::ensure_started(&self.binding, config);
    }

    /// Node-teardown hook: cancel the loop, drop cached state, and reset
    /// the projection gate.
    pub fn detach(&self) {
        self.binding.dispose();
        self.last.set(None);
    }

    #[must_use]
    pub fn binding(&self) -> &BlocBinding<B> {
        &self.binding
    }
}
