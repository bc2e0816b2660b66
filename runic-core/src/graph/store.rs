//! Dependency Graph Store
//!
//! Owns every node of one runtime and the edges between them. Dirty
//! propagation is push-based: a write walks the dependents of the written
//! cell and marks them, returning the effects that must be scheduled. Derived
//! nodes are never recomputed here; they wait to be pulled.
//!
//! # Algorithm
//!
//! 1. Advance the revision clock and stamp the written cell with it.
//! 2. Mark the cell's direct dependents "dirty".
//! 3. Propagate "maybe dirty" through derived nodes, breadth first.
//! 4. Collect every effect reached, in the order it was reached.
//!
//! Readers later compare `changed_at` against their own `verified_at` to
//! decide whether a maybe-dirty node really has to recompute.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind};

/// The graph of reactive nodes owned by one runtime.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Revision clock, advanced on every propagating write.
    revision: u64,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    /// Check whether a node is still part of the graph.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Replace every dependency of `node_id` with `reads`.
    ///
    /// Edges from the previous run that are not in `reads` are dropped, so a
    /// node never keeps a subscription it no longer uses. Reads of nodes that
    /// have left the graph are ignored.
    pub fn replace_dependencies(&mut self, node_id: NodeId, reads: IndexSet<NodeId>) {
        if !self.contains(node_id) {
            return;
        }

        let reads: IndexSet<NodeId> = reads
            .into_iter()
            .filter(|dep| *dep != node_id && self.contains(*dep))
            .collect();

        let previous = match self.nodes.get_mut(&node_id) {
            Some(node) => node.replace_dependencies(reads.clone()),
            None => return,
        };

        for stale in previous.difference(&reads) {
            if let Some(dep) = self.nodes.get_mut(stale) {
                dep.remove_dependent(node_id);
            }
        }
        for dep_id in &reads {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.add_dependent(node_id);
            }
        }
    }

    /// Current value of the revision clock.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Returns the effects reached, in breadth-first order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        self.revision += 1;
        let revision = self.revision;

        let mut effects = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct dependents
        match self.nodes.get_mut(&source_id) {
            Some(source) => {
                source.mark_changed(revision);
                queue.extend(source.dependents().iter().map(|id| (*id, true)));
            }
            None => return effects,
        }

        while let Some((node_id, direct)) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };

            if direct {
                node.mark_dirty();
            } else {
                node.mark_maybe_dirty();
            }

            match node.kind() {
                NodeKind::Effect => effects.push(node_id),
                NodeKind::Derived => {
                    queue.extend(node.dependents().iter().map(|id| (*id, false)));
                }
                NodeKind::Source => {}
            }
        }

        effects
    }

    /// Collect the source cells that `roots` transitively read from.
    pub fn sources_of(&self, roots: impl IntoIterator<Item = NodeId>) -> IndexSet<NodeId> {
        let mut sources = IndexSet::new();
        let mut seen = HashSet::new();
        let mut stack: SmallVec<[NodeId; 8]> = roots.into_iter().collect();

        while let Some(node_id) = stack.pop() {
            if !seen.insert(node_id) {
                continue;
            }
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            match node.kind() {
                NodeKind::Source => {
                    sources.insert(node_id);
                }
                _ => stack.extend(node.dependencies().iter().copied()),
            }
        }

        sources
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::DirtyState;

    fn chain() -> (DependencyGraph, NodeId, NodeId, NodeId, NodeId) {
        // source -> derived1 -> derived2 -> effect
        let mut graph = DependencyGraph::new();
        let source_id = graph.add_node(Node::source());
        let derived1_id = graph.add_node(Node::derived());
        let derived2_id = graph.add_node(Node::derived());
        let effect_id = graph.add_node(Node::effect());

        graph.replace_dependencies(derived1_id, [source_id].into_iter().collect());
        graph.replace_dependencies(derived2_id, [derived1_id].into_iter().collect());
        graph.replace_dependencies(effect_id, [derived2_id].into_iter().collect());

        for id in [derived1_id, derived2_id, effect_id] {
            graph.get_node_mut(id).unwrap().mark_clean(0);
        }

        (graph, source_id, derived1_id, derived2_id, effect_id)
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = DependencyGraph::new();

        let id1 = graph.add_node(Node::source());
        let id2 = graph.add_node(Node::derived());
        graph.replace_dependencies(id2, [id1].into_iter().collect());

        assert_eq!(graph.node_count(), 2);

        graph.remove_node(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).unwrap().dependencies().is_empty());
    }

    #[test]
    fn replace_dependencies_ignores_self_and_missing_nodes() {
        let mut graph = DependencyGraph::new();
        let source_id = graph.add_node(Node::source());
        let derived_id = graph.add_node(Node::derived());
        let gone = NodeId::new();

        graph.replace_dependencies(derived_id, [derived_id, gone, source_id].into_iter().collect());

        let deps: Vec<_> = graph.get_node(derived_id).unwrap().dependencies().iter().copied().collect();
        assert_eq!(deps, vec![source_id]);
        assert!(graph.get_node(source_id).unwrap().dependents().contains(&derived_id));

        // Unknown nodes are left alone
        graph.replace_dependencies(gone, [source_id].into_iter().collect());
        assert_eq!(graph.get_node(source_id).unwrap().dependents().len(), 1);
    }

    #[test]
    fn replace_dependencies_drops_stale_edges() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(Node::source());
        let b = graph.add_node(Node::source());
        let effect = graph.add_node(Node::effect());

        graph.replace_dependencies(effect, [a].into_iter().collect());
        assert!(graph.get_node(a).unwrap().dependents().contains(&effect));

        graph.replace_dependencies(effect, [b].into_iter().collect());
        assert!(!graph.get_node(a).unwrap().dependents().contains(&effect));
        assert!(graph.get_node(b).unwrap().dependents().contains(&effect));
        assert_eq!(graph.get_node(effect).unwrap().dependencies().len(), 1);
    }

    #[test]
    fn mark_changed_propagates() {
        let (mut graph, source_id, derived1_id, derived2_id, effect_id) = chain();

        let effects = graph.mark_changed(source_id);

        assert_eq!(effects, vec![effect_id]);
        assert_eq!(graph.revision(), 1);
        assert_eq!(graph.get_node(source_id).unwrap().changed_at(), 1);

        // Only the direct dependent is definitely dirty
        assert_eq!(graph.get_node(derived1_id).unwrap().dirty_state(), DirtyState::Dirty);
        assert_eq!(graph.get_node(derived2_id).unwrap().dirty_state(), DirtyState::MaybeDirty);
        assert_eq!(graph.get_node(effect_id).unwrap().dirty_state(), DirtyState::MaybeDirty);
    }

    #[test]
    fn sources_of_walks_through_derived() {
        let (graph, source_id, _, derived2_id, effect_id) = chain();

        let sources = graph.sources_of([effect_id]);
        assert_eq!(sources.len(), 1);
        assert!(sources.contains(&source_id));

        let sources = graph.sources_of([derived2_id, source_id]);
        assert_eq!(sources.len(), 1);
    }
}
