//! Lock-protected shared value cell.
//!
//! [`Shared<T>`] is the one mutable-state primitive the binding engine uses
//! across threads: a cheaply clonable handle to a single mutex-guarded value
//! with scoped accessors only. The lock is released on every exit path,
//! including panics inside the closure.
//!
//! # Invariants
//!
//! 1. No public API exposes the guard; acquisition is always scoped.
//! 2. A poisoned lock is recovered by taking the inner value. Cell contents
//!    are plain assignments, so a panic mid-closure cannot leave them in a
//!    torn state.
//! 3. Clones share the same cell (`Arc` interior).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cheaply clonable, mutex-protected single-value cell.
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Shared").field(&*self.lock()).finish()
    }
}

impl<T> Shared<T> {
    /// Create a new cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored value.
    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    /// Replace the stored value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.lock(), value)
    }

    /// Run `f` with a shared reference to the value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.lock())
    }

    /// Run `f` with a mutable reference to the value.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.lock())
    }
}

impl<T: Clone> Shared<T> {
    /// Clone the current value out of the cell.
    #[must_use]
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::thread;

    #[test]
    fn set_and_get() {
        let cell = Shared::new(1);
        assert_eq!(cell.get(), 1);
        cell.set(7);
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn replace_returns_previous() {
        let cell = Shared::new("a".to_string());
        let old = cell.replace("b".to_string());
        assert_eq!(old, "a");
        assert_eq!(cell.get(), "b");
    }

    #[test]
    fn with_mut_updates_in_place() {
        let cell = Shared::new(vec![1, 2]);
        cell.with_mut(|v| v.push(3));
        assert_eq!(cell.with(|v| v.len()), 3);
    }

    #[test]
    fn clones_share_storage() {
        let a = Shared::new(0);
        let b = a.clone();
        b.set(42);
        assert_eq!(a.get(), 42);
    }

    #[test]
    fn shared_across_threads() {
        let cell = Shared::new(0u64);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        cell.with_mut(|v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cell.get(), 800);
    }

    #[test]
    fn recovers_from_poison() {
        let cell = Shared::new(5);
        let panicking = cell.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            panicking.with(|_| panic!("boom"));
        }));
        assert!(result.is_err());
        // The cell stays usable after a panic under the lock.
        assert_eq!(cell.get(), 5);
        cell.set(6);
        assert_eq!(cell.get(), 6);
    }

}
