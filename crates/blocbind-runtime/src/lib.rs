//! Update scheduling and subscription lifecycle for bloc-to-view binding.
//!
//! This crate is the concurrency engine sitting between observable state
//! holders ([`blocbind_core::source::Bloc`]) and an embedding UI
//! framework. It owns:
//!
//! - the UI-affine execution seam ([`dispatch`]) — the engine never
//!   assumes which thread the UI runs on, it only posts jobs;
//! - the deduplicating LIFO [`queue`] every visible mutation flows
//!   through;
//! - per-node source resolution and cached snapshots ([`binding`]);
//! - the never-give-up [`subscription`] loop consuming update streams;
//! - the callback surfaces an embedder wires into node lifecycle hooks
//!   ([`listener`], [`builder`], [`selector`], [`consumer`]).
//!
//! # Invariants
//!
//! 1. Binding state visible to the UI mutates only on the dispatcher's
//!    context (teardown via `dispose` excepted).
//! 2. One subscription loop per attached node, cancelled exactly once at
//!    detach.
//! 3. Dispatchers and queues are explicit instances; nothing in this
//!    crate is process-global except `OpKey` allocation.

#![forbid(unsafe_code)]

pub mod binding;
pub mod builder;
pub mod consumer;
pub mod dispatch;
pub mod listener;
pub mod queue;
pub mod selector;
pub mod subscription;

pub use binding::{BindingError, BlocBinding};
pub use builder::BlocBuilder;
pub use consumer::BlocConsumer;
pub use dispatch::{ChannelDispatcher, InlineDispatcher, Job, MainDispatcher};
pub use listener::BlocListener;
pub use queue::{OpKey, UpdateQueue};
pub use selector::BlocSelector;
pub use subscription::{
    LoopPhase, ResubscribeHook, StateCallback, StateFilter, SubscriptionHandle,
};
