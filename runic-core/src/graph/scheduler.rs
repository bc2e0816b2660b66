//! Effect Scheduler
//!
//! The scheduler holds the effects that were dirtied since the last flush,
//! partitioned by phase. Each partition is an insertion-ordered set, so an
//! effect dirtied several times before a flush is queued once, at the
//! position of its first enqueue.
//!
//! Draining is pass-based: `take` hands the whole partition to the caller
//! and leaves an empty one behind, so anything enqueued while the caller runs
//! the batch lands in the next pass instead of extending the current one.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// When an effect runs relative to the host's render step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Before the host applies pending visual changes.
    Pre,
    /// After the host applied pending visual changes.
    Post,
}

/// Pending effects, one ordered set per phase.
#[derive(Debug, Default)]
pub struct Scheduler {
    pre: IndexSet<NodeId>,
    post: IndexSet<NodeId>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, phase: Phase) -> &IndexSet<NodeId> {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        }
    }

    fn queue_mut(&mut self, phase: Phase) -> &mut IndexSet<NodeId> {
        match phase {
            Phase::Pre => &mut self.pre,
            Phase::Post => &mut self.post,
        }
    }

    /// Queue an effect. Returns false if it was already pending.
    pub fn enqueue(&mut self, effect: NodeId, phase: Phase) -> bool {
        self.queue_mut(phase).insert(effect)
    }

    /// Take every effect pending for `phase`, in enqueue order.
    pub fn take(&mut self, phase: Phase) -> IndexSet<NodeId> {
        std::mem::take(self.queue_mut(phase))
    }

    /// Drop an effect from whichever phase holds it.
    pub fn remove(&mut self, effect: NodeId) {
        self.pre.shift_remove(&effect);
        self.post.shift_remove(&effect);
    }

    /// Number of effects pending for `phase`.
    pub fn pending(&self, phase: Phase) -> usize {
        self.queue(phase).len()
    }

    /// Whether both phases are empty.
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}
