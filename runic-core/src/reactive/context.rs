//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read, we can
//! register the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns one stack of frames. Entering a derived formula or an
//! effect body pushes a frame; every read made while that frame is on top is
//! recorded in it, and the frame's reads become the computation's new
//! dependency set when it is popped. Because the stack lives in the runtime
//! rather than in a thread-local, independent runtimes never see each other's
//! reads, even on the same thread.
//!
//! Two frame kinds do not correspond to a computation: `Untracked` swallows
//! reads, and `Inspect` records reads for instrumentation without turning
//! them into edges.

use indexmap::IndexSet;

use super::scope::ScopeId;
use crate::graph::NodeId;

/// What pushed a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// A derived formula is evaluating.
    Derived(NodeId),
    /// An effect body is running.
    Effect(NodeId),
    /// Reads are deliberately not recorded.
    Untracked,
    /// Reads are recorded for instrumentation only.
    Inspect,
}

/// Who adopts effects created while a frame is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    Scope(ScopeId),
    Effect(NodeId),
}

/// An entry in the reactive context stack.
#[derive(Debug)]
pub(crate) struct Frame {
    kind: FrameKind,
    owner: Option<Owner>,
    /// Nodes read while this frame was on top, in first-read order.
    reads: IndexSet<NodeId>,
}

impl Frame {
    pub(crate) fn kind(&self) -> FrameKind {
        self.kind
    }

    pub(crate) fn into_reads(self) -> IndexSet<NodeId> {
        self.reads
    }
}

/// The per-runtime stack of active frames.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    /// Push a frame, returning its depth for the matching `pop_to`.
    pub(crate) fn push(&mut self, kind: FrameKind, owner: Option<Owner>) -> usize {
        self.frames.push(Frame {
            kind,
            owner,
            reads: IndexSet::new(),
        });
        self.frames.len() - 1
    }

    /// Pop the frame pushed at `depth`, discarding anything left above it.
    pub(crate) fn pop_to(&mut self, depth: usize) -> Option<Frame> {
        if self.frames.len() <= depth {
            return None;
        }
        self.frames.truncate(depth + 1);
        let frame = self.frames.pop();
        debug_assert!(frame.is_some(), "context frame missing at depth {depth}");
        frame
    }

    /// Record a read of `node` in the top frame.
    pub(crate) fn track(&mut self, node: NodeId) {
        if let Some(frame) = self.frames.last_mut() {
            match frame.kind {
                FrameKind::Untracked => {}
                _ => {
                    frame.reads.insert(node);
                }
            }
        }
    }

    /// True iff the top frame is a derived formula or an effect body.
    pub(crate) fn is_tracking(&self) -> bool {
        matches!(
            self.frames.last().map(Frame::kind),
            Some(FrameKind::Derived(_)) | Some(FrameKind::Effect(_))
        )
    }

    /// The innermost computation, skipping untracked and inspect frames.
    pub(crate) fn current_computation(&self) -> Option<FrameKind> {
        self.frames
            .iter()
            .rev()
            .map(Frame::kind)
            .find(|kind| matches!(kind, FrameKind::Derived(_) | FrameKind::Effect(_)))
    }

    /// The derived formula a write would happen inside of, if any.
    pub(crate) fn current_derivation(&self) -> Option<NodeId> {
        match self.current_computation() {
            Some(FrameKind::Derived(id)) => Some(id),
            _ => None,
        }
    }

    /// Whether `node` is a derived currently being evaluated.
    pub(crate) fn is_computing(&self, node: NodeId) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.kind == FrameKind::Derived(node))
    }

    /// The owner new effects attach to.
    pub(crate) fn current_owner(&self) -> Option<Owner> {
        self.frames.iter().rev().find_map(|frame| frame.owner)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}
