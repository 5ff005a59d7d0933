//! Non-owning handle to a bloc.
//!
//! A binding caches "the source I last bound to" across re-renders without
//! extending that source's lifetime; the true owner is the registry scope
//! or the caller that supplied a constant. A dead handle is never an
//! error, only a trigger to re-resolve.

use std::sync::{Arc, Weak};

/// Weak reference to a bloc instance.
pub struct WeakBloc<B> {
    inner: Weak<B>,
}

impl<B> WeakBloc<B> {
    /// Create a handle observing `strong` without owning it.
    pub fn new(strong: &Arc<B>) -> Self {
        Self {
            inner: Arc::downgrade(strong),
        }
    }

    /// Upgrade to a live reference, or `None` if the source is gone.
    #[must_use]
    pub fn resolve(&self) -> Option<Arc<B>> {
        self.inner.upgrade()
    }

    /// Whether the referenced source is still alive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<B> Clone for WeakBloc<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for WeakBloc<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBloc")
            .field("live", &self.is_live())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
