//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between state cells, derived values and effects, plus the queue of effects
//! waiting for the next flush.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent state cells (sources), derived values and effects
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, we traverse the graph to find all affected nodes and
//! mark them. Derived nodes are recomputed lazily when next read; effects are
//! handed to the [`Scheduler`].
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than distributed linked lists because:
//!    - It keeps edge replacement on recomputation a single operation
//!    - It allows the graph to be inspected (e.g. to find the sources of a
//!      traced value)
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;
mod store;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::{Phase, Scheduler};
pub use store::DependencyGraph;
