//! Reactive Primitives
//!
//! This module implements the core reactive system: state cells, derived
//! values and effects, plus the runtime that connects them.
//!
//! # Concepts
//!
//! ## State Cells
//!
//! A [`State`] is a container for mutable state. When a cell is read within a
//! tracking context (a derived formula or an effect body), the read is
//! recorded as a dependency. When the cell's value changes, every dependent is
//! marked dirty.
//!
//! ## Derived Values
//!
//! A [`Derived`] caches the result of a formula over other reactive values. It
//! is computed on first read and re-evaluated only when something it read
//! actually changed.
//!
//! ## Effects
//!
//! An effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects run in one of two phases relative to the
//! host's render step, and may return a [`Cleanup`].
//!
//! # Implementation Notes
//!
//! Tracking state lives in the [`Runtime`], not in a thread-local. Every
//! handle remembers the runtime it was created by, so several independent
//! graphs can coexist on one thread without seeing each other's reads.

mod context;
mod derived;
mod effect;
mod inspect;
mod props;
mod runtime;
mod scope;
mod state;

pub use derived::Derived;
pub use effect::{Cleanup, EffectHandle, EffectOutput};
pub use inspect::{Inspect, InspectEvent, InspectKind, InspectSink, TracingSink};
pub use props::{Prop, Props};
pub use runtime::Runtime;
pub use scope::{Scope, ScopeId};
pub use state::State;
