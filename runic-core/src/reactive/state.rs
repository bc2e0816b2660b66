//! State Cell Implementation
//!
//! A state cell is the source of truth in the graph. It holds a value and
//! records which computations read it.
//!
//! # How State Cells Work
//!
//! 1. When a cell is read inside a derived formula or an effect body, the
//!    read is recorded in the active frame and becomes an edge once the
//!    computation finishes.
//!
//! 2. When a write changes the value, the runtime marks every dependent
//!    dirty and queues the effects it reaches. Nothing runs until the next
//!    flush.
//!
//! 3. A write that leaves the value equal under the cell's equality is a
//!    no-op for the graph.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot` `RwLock`; the version is an atomic.
//! Reads and writes from other threads are safe, though the runtime still
//! treats the graph as one logical thread of control.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use super::runtime::{subscriber_count, Runtime, Shared};
use crate::error::ReactiveError;
use crate::graph::{Node, NodeId};

struct StateInner<T> {
    id: NodeId,
    value: RwLock<T>,
    /// Bumped by every write, including ones that leave the value equal.
    version: AtomicU64,
    equals: fn(&T, &T) -> bool,
    runtime: Weak<Shared>,
}

impl<T> Drop for StateInner<T> {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.release(self.id);
        }
    }
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning a `State` yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use runic_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.state(0);
///
/// assert_eq!(count.get(), 0);
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct State<T> {
    inner: Arc<StateInner<T>>,
}

impl<T> State<T>
where
    T: Send + Sync + 'static,
{
    /// Get the cell's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Borrow the current value, recording the read if a computation is
    /// running.
    ///
    /// The cell is read-locked while `f` runs, so `f` must not write to it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if let Some(rt) = self.inner.runtime.upgrade() {
            rt.track(self.inner.id);
        }
        f(&self.inner.value.read())
    }

    /// Write a new value.
    ///
    /// Returns `Ok(true)` if the value changed and dependents were notified,
    /// `Ok(false)` if it was equal to the old one. Fails with
    /// [`ReactiveError::WriteDuringDerivation`] inside a derived formula.
    #[track_caller]
    pub fn try_set(&self, value: T) -> Result<bool, ReactiveError> {
        let location = Location::caller();
        let inner = &*self.inner;
        let runtime = inner.runtime.upgrade();

        if let Some(rt) = &runtime {
            if let Some(derived) = rt.state.lock().context.current_derivation() {
                return Err(ReactiveError::WriteDuringDerivation {
                    cell: inner.id,
                    derived,
                });
            }
        }

        let (previous, changed) = {
            let mut slot = inner.value.write();
            let changed = !(inner.equals)(&slot, &value);
            (std::mem::replace(&mut *slot, value), changed)
        };
        let version = inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        drop(previous);

        if changed {
            tracing::trace!(cell = %inner.id, version, "state changed");
            if let Some(rt) = runtime {
                rt.propagate_write(inner.id, version, location);
            }
        }
        Ok(changed)
    }

    /// Write a new value, panicking with the [`ReactiveError`] on failure.
    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            err.raise();
        }
    }

    /// Number of computations currently reading this cell.
    pub fn subscriber_count(&self) -> usize {
        subscriber_count(&self.inner.runtime, self.inner.id)
    }
}

impl<T> State<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value, recording the read if a computation is running.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Write a value computed from the current one.
    ///
    /// The current value is read untracked.
    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.read());
        self.set(next);
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for State<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

/// Serializes the current value, recording the read like [`State::with`].
impl<T> Serialize for State<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}

impl Runtime {
    /// Create a state cell compared with `PartialEq`.
    pub fn state<T>(&self, value: T) -> State<T>
    where
        T: PartialEq + Send + Sync + 'static,
    {
        self.state_with(value, |a, b| a == b)
    }

    /// Create a state cell with a custom equality.
    ///
    /// A write is ignored by the graph when `equals(old, new)` holds. Passing
    /// `|_, _| false` makes every write notify.
    pub fn state_with<T>(&self, value: T, equals: fn(&T, &T) -> bool) -> State<T>
    where
        T: Send + Sync + 'static,
    {
        let shared = self.shared();
        let id = shared.register(Node::source());
        State {
            inner: Arc::new(StateInner {
                id,
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                equals,
                runtime: Arc::downgrade(shared),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_get_set() {
        let rt = Runtime::new();
        let cell = rt.state(42);
        assert_eq!(cell.get(), 42);

        cell.set(100);
        assert_eq!(cell.get(), 100);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn state_update() {
        let rt = Runtime::new();
        let cell = rt.state(10);
        cell.update(|x| x * 2);
        assert_eq!(cell.get(), 20);
    }

    #[test]
    fn equal_write_bumps_version_only() {
        let rt = Runtime::new();
        let cell = rt.state(String::from("a"));

        assert_eq!(cell.try_set("a".to_string()), Ok(false));
        assert_eq!(cell.version(), 1);
        assert!(!rt.has_pending());

        assert_eq!(cell.try_set("b".to_string()), Ok(true));
        assert_eq!(cell.version(), 2);
    }

    #[test]
    fn custom_equality() {
        let rt = Runtime::new();
        // Only the integer part matters
        let cell = rt.state_with(1.2_f64, |a, b| a.trunc() == b.trunc());

        assert_eq!(cell.try_set(1.9), Ok(false));
        assert_eq!(cell.get(), 1.9);
        assert_eq!(cell.try_set(2.0), Ok(true));
    }

    #[test]
    fn clones_share_the_cell() {
        let rt = Runtime::new();
        let cell = rt.state(vec![1, 2]);
        let other = cell.clone();

        other.set(vec![3]);
        assert_eq!(cell.get(), vec![3]);
        assert_eq!(cell.id(), other.id());
    }

    #[test]
    fn dropping_last_handle_releases_node() {
        let rt = Runtime::new();
        let cell = rt.state(0);
        let other = cell.clone();
        assert_eq!(rt.node_count(), 1);

        drop(cell);
        assert_eq!(rt.node_count(), 1);
        drop(other);
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn serializes_current_value() {
        let rt = Runtime::new();
        let cell = rt.state(vec!["x", "y"]);
        assert_eq!(serde_json::to_string(&cell).unwrap(), r#"["x","y"]"#);
    }

    #[test]
    fn cell_outlives_runtime() {
        let rt = Runtime::new();
        let cell = rt.state(1);
        drop(rt);

        cell.set(2);
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.subscriber_count(), 0);
    }
}
