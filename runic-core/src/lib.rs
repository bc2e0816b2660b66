//! Runic Core
//!
//! This crate provides the core runtime for the Runic fine-grained
//! reactivity engine. It implements:
//!
//! - Reactive primitives (state cells, derived values, effects)
//! - A dependency graph with lazy, glitch-free propagation
//! - A two-phase effect scheduler around the host's render step
//! - Instrumentation taps that observe values without joining the graph
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: the runtime handle and the primitives it creates
//! - `graph`: dependency graph, dirty states and the effect queue
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use runic_core::{Cleanup, Runtime};
//!
//! let rt = Runtime::new();
//! let count = rt.state(0);
//! let doubled = {
//!     let count = count.clone();
//!     rt.derived(move || count.get() * 2)
//! };
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let seen_clone = seen.clone();
//! let effect = rt.effect(move || {
//!     seen_clone.lock().unwrap().push(doubled.get());
//!     let seen = seen_clone.clone();
//!     Cleanup::new(move || seen.lock().unwrap().push(-1))
//! });
//!
//! count.set(1);
//! count.set(2);
//! rt.tick(|| { /* apply DOM changes */ }).unwrap();
//!
//! effect.dispose();
//! assert_eq!(*seen.lock().unwrap(), vec![0, -1, 4, -1]);
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{RuntimeConfig, DEFAULT_MAX_FLUSH_PASSES};
pub use error::ReactiveError;
pub use graph::{DirtyState, NodeId, NodeKind, Phase};
pub use reactive::{
    Cleanup, Derived, EffectHandle, EffectOutput, Inspect, InspectEvent, InspectKind,
    InspectSink, Prop, Props, Runtime, Scope, ScopeId, State, TracingSink,
};
