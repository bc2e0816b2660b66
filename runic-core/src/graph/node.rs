//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the dependency graph.
///
/// Ids are unique across every runtime in the process, so an id printed in
/// an error or a trace event always names exactly one cell, derived value or
/// effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A state cell. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived value. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. A transitive dependency changed,
    /// but we have not yet verified if any direct input produced a new value.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct input was written.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Current dirty state.
    dirty: DirtyState,

    /// Revision at which this node's value last changed.
    changed_at: u64,

    /// Revision at which this node was last computed or verified clean.
    verified_at: u64,

    /// Nodes that this node depends on (parents in the DAG).
    /// For a derived value, these are the cells/derived values it reads from.
    /// Insertion order is read order, which the maybe-dirty check relies on.
    dependencies: IndexSet<NodeId>,

    /// Nodes that depend on this node (children in the DAG).
    /// Insertion order is subscription order, which fixes enqueue order.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind and a fresh id.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
                NodeKind::Effect => DirtyState::Dirty,
            },
            changed_at: 0,
            verified_at: 0,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new source (state cell) node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new derived node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new effect node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Mark the node as clean and verified at `revision`.
    pub fn mark_clean(&mut self, revision: u64) {
        self.dirty = DirtyState::Clean;
        self.verified_at = revision;
    }

    /// Mark the node as maybe dirty (a transitive dependency might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    /// Record that this node's value changed at `revision`.
    pub fn mark_changed(&mut self, revision: u64) {
        self.changed_at = revision;
    }

    /// Revision of the last value change.
    pub fn changed_at(&self) -> u64 {
        self.changed_at
    }

    /// Revision of the last computation or clean verification.
    pub fn verified_at(&self) -> u64 {
        self.verified_at
    }

    /// Remove a dependency.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Swap in a new dependency set, returning the previous one.
    pub(crate) fn replace_dependencies(&mut self, deps: IndexSet<NodeId>) -> IndexSet<NodeId> {
        std::mem::replace(&mut self.dependencies, deps)
    }
}
