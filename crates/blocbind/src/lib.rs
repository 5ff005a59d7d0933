#![forbid(unsafe_code)]

//! Blocbind public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use blocbind_core::context::{BlocContext, ContextError};
pub use blocbind_core::cubit::Cubit;
pub use blocbind_core::source::{Bloc, StreamError, Updates, UpdatesStep};
pub use blocbind_core::sync::Shared;
pub use blocbind_core::weak::WeakBloc;
pub use blocbind_runtime::{
    BindingError, BlocBinding, BlocBuilder, BlocConsumer, BlocListener, BlocSelector,
    ChannelDispatcher, InlineDispatcher, Job, LoopPhase, MainDispatcher, OpKey,
    SubscriptionHandle, UpdateQueue,
};

pub mod prelude {
    pub use blocbind_core as core;
    pub use blocbind_runtime as runtime;
}
