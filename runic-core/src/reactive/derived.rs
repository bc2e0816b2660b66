//! Derived Value Implementation
//!
//! A derived value is a cached computation over other cells and derived
//! values. It only re-evaluates when something it read actually changed.
//!
//! # How Derived Values Work
//!
//! 1. Nothing is computed at creation. The first read runs the formula and
//!    caches the result, recording what the formula read.
//!
//! 2. A write to a direct dependency marks the derived value dirty; a write
//!    further upstream marks it maybe-dirty.
//!
//! 3. On the next read, a dirty value recomputes. A maybe-dirty value first
//!    brings its derived dependencies up to date and only recomputes if one
//!    of them produced a new value.
//!
//! 4. A recomputation that yields a value equal to the cached one keeps the
//!    old value and does not count as a change, so dependents stay clean.
//!
//! # Why This Matters
//!
//! - A cell changes
//! - 10 derived values depend on it
//! - Only the ones actually read will recompute
//! - Derived values that are never read stay dirty (no wasted work)

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};

use super::context::FrameKind;
use super::runtime::{subscriber_count, Computation, Runtime, Shared};
use crate::error::ReactiveError;
use crate::graph::{DirtyState, Node, NodeId};

type Formula<T> = Box<dyn Fn() -> T + Send + Sync>;

struct DerivedInner<T> {
    id: NodeId,
    formula: Formula<T>,
    value: RwLock<Option<T>>,
    runtime: Weak<Shared>,
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn cached(&self) -> Option<T> {
        self.value.read().clone()
    }

    /// Bring the cache up to date and return it.
    fn update(&self, rt: &Shared) -> Result<T, ReactiveError> {
        let dirty = {
            let st = rt.state.lock();
            if st.context.is_computing(self.id) {
                return Err(ReactiveError::DependencyCycle { node: self.id });
            }
            st.graph.get_node(self.id).map(Node::dirty_state)
        };

        match dirty {
            Some(DirtyState::Clean) => {
                if let Some(value) = self.cached() {
                    return Ok(value);
                }
            }
            Some(DirtyState::MaybeDirty) => {
                if let Some(value) = self.cached() {
                    if !rt.dependencies_changed(self.id)? {
                        let mut guard = rt.state.lock();
                        let st = &mut *guard;
                        let revision = st.graph.revision();
                        if let Some(node) = st.graph.get_node_mut(self.id) {
                            node.mark_clean(revision);
                        }
                        return Ok(value);
                    }
                }
            }
            Some(DirtyState::Dirty) | None => {}
        }

        self.recompute(rt)
    }

    fn recompute(&self, rt: &Shared) -> Result<T, ReactiveError> {
        let revision = rt.state.lock().graph.revision();

        let frame = rt.enter(FrameKind::Derived(self.id), None);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.formula)()));
        let reads = frame.finish();

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => {
                let err = ReactiveError::from_panic(payload, |message| ReactiveError::DerivedBody {
                    node: self.id,
                    message,
                });
                let mut guard = rt.state.lock();
                let st = &mut *guard;
                st.graph.replace_dependencies(self.id, reads);
                if let Some(node) = st.graph.get_node_mut(self.id) {
                    node.mark_dirty();
                }
                return Err(err);
            }
        };

        let result = value.clone();
        let (changed, discarded) = {
            let mut slot = self.value.write();
            match slot.as_ref() {
                Some(old) if *old == value => (false, Some(value)),
                _ => (true, slot.replace(value)),
            }
        };
        drop(discarded);

        tracing::trace!(derived = %self.id, changed, "derived recomputed");

        let mut guard = rt.state.lock();
        let st = &mut *guard;
        st.graph.replace_dependencies(self.id, reads);
        if let Some(node) = st.graph.get_node_mut(self.id) {
            if changed {
                node.mark_changed(revision);
            }
            node.mark_clean(revision);
        }
        Ok(result)
    }
}

impl<T> Computation for DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn refresh(&self) -> Result<(), ReactiveError> {
        match self.runtime.upgrade() {
            Some(rt) => self.update(&rt).map(drop),
            None => Ok(()),
        }
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.release(self.id);
        }
    }
}

/// A lazily evaluated, memoized value computed from other reactive values.
///
/// # Type Parameters
///
/// - `T`: The computed value. `PartialEq` lets the runtime tell whether a
///   recomputation actually produced something new.
///
/// # Example
///
/// ```rust
/// use runic_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.state(5);
/// let count_clone = count.clone();
/// let doubled = rt.derived(move || count_clone.get() * 2);
///
/// assert_eq!(doubled.get(), 10);
/// count.set(6);
/// assert_eq!(doubled.get(), 12);
/// ```
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Get the derived value's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if needed.
    ///
    /// Records the read if a computation is running. Fails with
    /// [`ReactiveError::DependencyCycle`] if the formula reads itself, and
    /// with [`ReactiveError::DerivedBody`] if it panics.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let Some(rt) = self.inner.runtime.upgrade() else {
            // Detached from its runtime: plain function call
            return Ok((self.inner.formula)());
        };
        let value = self.inner.update(&rt)?;
        rt.track(self.inner.id);
        Ok(value)
    }

    /// Get the current value, panicking with the [`ReactiveError`] on failure.
    pub fn get(&self) -> T {
        self.try_get().unwrap_or_else(|err| err.raise())
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        match self.inner.runtime.upgrade() {
            Some(rt) => rt.untracked(|| self.get()),
            None => self.get(),
        }
    }

    /// Freshness of the cached value as the graph last marked it.
    ///
    /// `MaybeDirty` means a transitive source changed and the next read will
    /// verify before deciding whether to recompute. Reports `Dirty` once the
    /// runtime is gone.
    pub fn dirty_state(&self) -> DirtyState {
        self.inner
            .runtime
            .upgrade()
            .and_then(|rt| rt.state.lock().graph.get_node(self.inner.id).map(Node::dirty_state))
            .unwrap_or(DirtyState::Dirty)
    }

    /// Whether a value has been computed and cached.
    pub fn is_computed(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Number of computations currently reading this value.
    pub fn subscriber_count(&self) -> usize {
        subscriber_count(&self.inner.runtime, self.inner.id)
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Derived<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("cached", &*self.inner.value.read())
            .finish()
    }
}

impl<T> Serialize for Derived<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.try_get()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl Runtime {
    /// Create a derived value. The formula does not run until the first read.
    pub fn derived<T, F>(&self, formula: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let shared = self.shared();
        let id = shared.register(Node::derived());
        let inner = Arc::new(DerivedInner {
            id,
            formula: Box::new(formula),
            value: RwLock::new(None),
            runtime: Arc::downgrade(shared),
        });

        let computation: Weak<dyn Computation> = Arc::downgrade(&inner) as Weak<dyn Computation>;
        shared.state.lock().computations.insert(id, computation);

        Derived { inner }
    }
}
