//! Component props.
//!
//! A props bag is whatever struct the host passes to a component. The runtime
//! only hands out a shared, read-only view of it; fields that should stay
//! reactive are declared as [`Prop`] so the component can read them through
//! one `get()` no matter how the caller supplied them.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::derived::Derived;
use super::runtime::Runtime;
use super::state::State;

/// A prop value that can be:
/// - A static value
/// - A state cell
/// - A derived value
pub enum Prop<T> {
    Static(T),
    State(State<T>),
    Derived(Derived<T>),
}

impl<T> Prop<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Get the current value, tracked like a read of the underlying cell.
    pub fn get(&self) -> T {
        match self {
            Prop::Static(value) => value.clone(),
            Prop::State(cell) => cell.get(),
            Prop::Derived(derived) => derived.get(),
        }
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        match self {
            Prop::Static(value) => value.clone(),
            Prop::State(cell) => cell.get_untracked(),
            Prop::Derived(derived) => derived.get_untracked(),
        }
    }

    /// Whether reads of this prop can change over time.
    pub fn is_reactive(&self) -> bool {
        !matches!(self, Prop::Static(_))
    }
}

impl<T> From<State<T>> for Prop<T> {
    fn from(cell: State<T>) -> Self {
        Prop::State(cell)
    }
}

impl<T> From<Derived<T>> for Prop<T> {
    fn from(derived: Derived<T>) -> Self {
        Prop::Derived(derived)
    }
}

impl<T: Clone> Clone for Prop<T> {
    fn clone(&self) -> Self {
        match self {
            Prop::Static(value) => Prop::Static(value.clone()),
            Prop::State(cell) => Prop::State(cell.clone()),
            Prop::Derived(derived) => Prop::Derived(derived.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Prop::State(cell) => f.debug_tuple("State").field(cell).finish(),
            Prop::Derived(derived) => f.debug_tuple("Derived").field(derived).finish(),
        }
    }
}

impl<T> Serialize for Prop<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Prop::Static(value) => value.serialize(serializer),
            Prop::State(cell) => cell.serialize(serializer),
            Prop::Derived(derived) => derived.serialize(serializer),
        }
    }
}

/// Shared read-only handle to a component's props bag.
pub struct Props<P> {
    bag: Arc<P>,
}

impl<P> Props<P> {
    pub fn new(bag: P) -> Self {
        Self { bag: Arc::new(bag) }
    }
}

impl<P> Deref for Props<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.bag
    }
}

impl<P> Clone for Props<P> {
    fn clone(&self) -> Self {
        Self {
            bag: Arc::clone(&self.bag),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Props<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Props").field(&*self.bag).finish()
    }
}

impl<P: Serialize> Serialize for Props<P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bag.serialize(serializer)
    }
}

impl Runtime {
    /// Wrap the props bag a component was instantiated with.
    pub fn props<P>(&self, bag: P) -> Props<P> {
        Props::new(bag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct ButtonProps {
        label: Prop<String>,
        disabled: Prop<bool>,
    }

    #[test]
    fn static_and_reactive_props() {
        let rt = Runtime::new();
        let label = rt.state("Save".to_string());

        let props = rt.props(ButtonProps {
            label: label.clone().into(),
            disabled: Prop::Static(false),
        });

        assert_eq!(props.label.get(), "Save");
        assert!(props.label.is_reactive());
        assert!(!props.disabled.is_reactive());
        assert!(!props.disabled.get());

        label.set("Saving".to_string());
        assert_eq!(props.label.get(), "Saving");
    }

    #[test]
    fn reactive_prop_drives_effect() {
        let rt = Runtime::new();
        let count = rt.state(1);
        let count_clone = count.clone();
        let doubled = rt.derived(move || count_clone.get() * 2);

        let props = rt.props(Prop::from(doubled));
        let seen = Arc::new(AtomicI32::new(0));

        let props_clone = props.clone();
        let seen_clone = seen.clone();
        rt.effect(move || {
            seen_clone.store(props_clone.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        count.set(4);
        rt.flush().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn props_serialize_through() {
        let rt = Runtime::new();
        let cell = rt.state(3);
        let prop: Prop<i32> = cell.into();

        assert_eq!(serde_json::to_string(&prop).unwrap(), "3");
    }
}
