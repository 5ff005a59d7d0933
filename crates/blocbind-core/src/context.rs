//! Typed, hierarchical bloc registry.
//!
//! A [`BlocContext`] maps a bloc's type to a lazily-invoked factory. A
//! scope owns the blocs it instantiates: dropping the scope drops them,
//! which is what lets a binding's weak handle die and trigger
//! re-resolution. Child scopes see parent registrations; registrations
//! shadow outward, never mutate a parent.
//!
//! # Failure semantics
//!
//! - Registering the same type twice in one scope is a programming error
//!   and panics at configuration time.
//! - Reading an unregistered type is a typed [`ContextError`], not an
//!   abort; the embedder decides policy.

use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

use ahash::AHashMap;
use thiserror::Error;

use crate::sync::Shared;

/// Registry lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The requested type was never registered in this scope or any parent.
    #[error("no bloc registered for type {type_name}")]
    NotRegistered { type_name: &'static str },
    /// The entry keyed under this type holds a different concrete type.
    /// Reaching this means a registration bug, not a caller error.
    #[error("registry entry for {type_name} holds a different type")]
    TypeConflict { type_name: &'static str },
}

type AnyBloc = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> AnyBloc + Send + Sync>;

struct Entry {
    factory: Factory,
    cached: Option<AnyBloc>,
}

struct ContextNode {
    entries: Shared<AHashMap<TypeId, Entry>>,
    parent: Option<BlocContext>,
}

/// Handle to one registry scope. Clones share the scope.
#[derive(Clone)]
pub struct BlocContext {
    node: Arc<ContextNode>,
}

impl Default for BlocContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BlocContext {
    /// Create an empty root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            node: Arc::new(ContextNode {
                entries: Shared::new(AHashMap::new()),
                parent: None,
            }),
        }
    }

    /// Create a child scope that sees this scope's registrations.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(ContextNode {
                entries: Shared::new(AHashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Register a factory for `B` in this scope.
    ///
    /// The factory runs at most once per scope, on first
    /// [`read`](Self::read); the instance is cached and owned by the scope.
    ///
    /// # Panics
    ///
    /// Panics if `B` is already registered in this scope.
    pub fn register<B, F>(&self, factory: F)
    where
        B: Send + Sync + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.insert::<B>(Entry {
            factory: Arc::new(move || Arc::new(factory()) as AnyBloc),
            cached: None,
        });
    }

    /// Register an existing instance for `B` in this scope.
    ///
    /// # Panics
    ///
    /// Panics if `B` is already registered in this scope.
    pub fn register_value<B>(&self, bloc: Arc<B>)
    where
        B: Send + Sync + 'static,
    {
        let cached: AnyBloc = bloc.clone();
        self.insert::<B>(Entry {
            factory: Arc::new(move || bloc.clone() as AnyBloc),
            cached: Some(cached),
        });
    }

    fn insert<B: 'static>(&self, entry: Entry) {
        let key = TypeId::of::<B>();
        self.node.entries.with_mut(|entries| {
            assert!(
                !entries.contains_key(&key),
                "bloc type {} registered twice in one scope",
                type_name::<B>()
            );
            entries.insert(key, entry);
        });
    }

    /// Whether `B` is registered in this scope or any parent.
    #[must_use]
    pub fn is_registered<B: 'static>(&self) -> bool {
        let key = TypeId::of::<B>();
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if ctx.node.entries.with(|e| e.contains_key(&key)) {
                return true;
            }
            scope = ctx.node.parent.as_ref();
        }
        false
    }

    /// Resolve an instance of `B`, walking from this scope outward.
    ///
    /// Repeated reads within one scope return the same instance.
    pub fn read<B>(&self) -> Result<Arc<B>, ContextError>
    where
        B: Send + Sync + 'static,
    {
        let key = TypeId::of::<B>();
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if let Some(found) = ctx.resolve_local(key)? {
                return downcast::<B>(found);
            }
            scope = ctx.node.parent.as_ref();
        }
        Err(ContextError::NotRegistered {
            type_name: type_name::<B>(),
        })
    }

    /// Resolve `key` in this scope only. `Ok(None)` means not registered
    /// here; parents are the caller's concern.
    fn resolve_local(&self, key: TypeId) -> Result<Option<AnyBloc>, ContextError> {
        // The factory runs outside the lock: it may itself read from this
        // scope (blocs depending on blocs).
        let factory = {
            match self.node.entries.with(|entries| {
                entries
                    .get(&key)
                    .map(|entry| entry.cached.clone().ok_or_else(|| entry.factory.clone()))
            }) {
                None => return Ok(None),
                Some(Ok(cached)) => return Ok(Some(cached)),
                Some(Err(factory)) => factory,
            }
        };

        let created = factory();
        tracing::debug!(bloc = ?created.type_id(), "instantiated bloc from registry factory");

        // Another thread may have instantiated concurrently; first write wins
        // so reads stay idempotent per scope.
        Ok(Some(self.node.entries.with_mut(|entries| {
            match entries.get_mut(&key) {
                Some(entry) => entry.cached.get_or_insert(created).clone(),
                None => created,
            }
        })))
    }
}

fn downcast<B: Send + Sync + 'static>(any: AnyBloc) -> Result<Arc<B>, ContextError> {
    any.downcast::<B>()
        .map_err(|_| ContextError::TypeConflict {
            type_name: type_name::<B>(),
        })
}

impl std::fmt::Debug for BlocContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocContext")
            .field("entries", &self.node.entries.with(|e| e.len()))
            .field("has_parent", &self.node.parent.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cubit::Cubit;
    use crate::source::Bloc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn read_unregistered_is_typed_error() {
        let ctx = BlocContext::new();
        let err = ctx.read::<Cubit<i32>>().unwrap_err();
        assert!(matches!(err, ContextError::NotRegistered { .. }));
        assert!(err.to_string().contains("Cubit"));
    }

    #[test]
    fn factory_runs_once_per_scope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = calls.clone();

        let ctx = BlocContext::new();
        ctx.register(move || {
            counting.fetch_add(1, Ordering::SeqCst);
            Cubit::new(0)
        });

        let a = ctx.read::<Cubit<i32>>().unwrap();
        let b = ctx.read::<Cubit<i32>>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(0));
        ctx.register(|| Cubit::new(1));
    }

    #[test]
    fn child_sees_parent_registrations() {
        let parent = BlocContext::new();
        parent.register(|| Cubit::new(5));

        let child = parent.child();
        let from_child = child.read::<Cubit<i32>>().unwrap();
        let from_parent = parent.read::<Cubit<i32>>().unwrap();
        assert!(Arc::ptr_eq(&from_child, &from_parent));
    }

    #[test]
    fn child_registration_shadows_parent() {
        let parent = BlocContext::new();
        parent.register(|| Cubit::new(1));

        let child = parent.child();
        child.register(|| Cubit::new(2));

        assert_eq!(child.read::<Cubit<i32>>().unwrap().state(), 2);
        assert_eq!(parent.read::<Cubit<i32>>().unwrap().state(), 1);
    }

    #[test]
    fn register_value_returns_same_instance() {
        let bloc = Arc::new(Cubit::new(9));
        let ctx = BlocContext::new();
        ctx.register_value(bloc.clone());

        let read = ctx.read::<Cubit<i32>>().unwrap();
        assert!(Arc::ptr_eq(&bloc, &read));
    }

    #[test]
    fn distinct_state_types_coexist() {
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(1i32));
        ctx.register(|| Cubit::new("x".to_string()));

        assert_eq!(ctx.read::<Cubit<i32>>().unwrap().state(), 1);
        assert_eq!(ctx.read::<Cubit<String>>().unwrap().state(), "x");
    }

    #[test]
    fn factory_may_read_sibling_registrations() {
        let ctx = BlocContext::new();
        ctx.register(|| Cubit::new(21i32));

        let dep = ctx.clone();
        ctx.register(move || {
            let base = dep.read::<Cubit<i32>>().unwrap().state();
            Cubit::new(format!("doubled: {}", base * 2))
        });

        assert_eq!(
            ctx.read::<Cubit<String>>().unwrap().state(),
            "doubled: 42"
        );
    }

    #[test]
    fn scope_owns_its_blocs() {
        let parent = BlocContext::new();
        let weak;
        {
            let child = parent.child();
            child.register(|| Cubit::new(0));
            let strong = child.read::<Cubit<i32>>().unwrap();
            weak = Arc::downgrade(&strong);
            drop(strong);
            assert!(weak.upgrade().is_some());
        }
        // The child scope was the only owner.
        assert!(weak.upgrade().is_none());
    }
}
