#![forbid(unsafe_code)]

//! Core: the observable-source contract, weak binding handles, shared-state
//! cells, and the typed bloc registry.
//!
//! Everything here is a leaf: no scheduling, no subscription lifecycle.
//! The runtime crate builds the binding engine on top of these primitives.

pub mod context;
pub mod cubit;
pub mod source;
pub mod sync;
pub mod weak;

pub use context::{BlocContext, ContextError};
pub use cubit::Cubit;
pub use source::{Bloc, StreamError, Updates, UpdatesStep};
pub use sync::Shared;
pub use weak::WeakBloc;
