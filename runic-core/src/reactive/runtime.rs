//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects state cells, derived
//! values and effects. It owns the dependency graph, the tracking context and
//! the effect queue, and it schedules updates when cells change.
//!
//! # How It Works
//!
//! 1. When a cell, derived value or effect is created, it registers a node
//!    with the runtime.
//!
//! 2. When a derived value or effect reads a cell, the runtime records the
//!    read in the active frame; the frame's reads replace the node's edges
//!    when the computation finishes.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Advances its revision clock
//!    b. Marks direct dependents dirty and transitive ones maybe-dirty
//!    c. Queues every effect reached
//!    d. Leaves derived values alone - they recompute on next access
//!
//! 4. [`Runtime::tick`] drains the PRE queue, calls the host's render step,
//!    then drains the POST queue.
//!
//! # Thread Safety
//!
//! A runtime is one logical thread of control. Its shared state sits behind a
//! single `parking_lot` mutex that is never held while user code runs, so
//! formulas, effect bodies, cleanups and sinks are free to call back into the
//! runtime. Handles are `Send + Sync`, which lets independent runtimes live on
//! different threads.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::{ContextStack, FrameKind, Owner};
use super::effect::EffectSlot;
use super::inspect::{InspectEvent, InspectSink, TracingSink};
use super::scope::ScopeId;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{DependencyGraph, DirtyState, Node, NodeId, Phase, Scheduler};

/// A node the runtime can bring up to date on demand.
///
/// Derived values register themselves under this trait so that the
/// maybe-dirty check can refresh a dependency it only knows by id.
pub(crate) trait Computation: Send + Sync {
    /// Recompute if needed, leaving the node clean on success.
    fn refresh(&self) -> Result<(), ReactiveError>;
}

/// Everything the runtime mutex protects.
pub(crate) struct RuntimeState {
    pub(crate) graph: DependencyGraph,
    pub(crate) context: ContextStack,
    pub(crate) scheduler: Scheduler,
    pub(crate) effects: HashMap<NodeId, EffectSlot>,
    pub(crate) scopes: HashMap<ScopeId, SmallVec<[NodeId; 4]>>,
    // Weak so the registry never keeps a dropped derived alive.
    pub(crate) computations: HashMap<NodeId, Weak<dyn Computation>>,
    /// Cells watched by `log_trace`, with the location of the trace call.
    pub(crate) traced: HashMap<NodeId, &'static Location<'static>>,
    pub(crate) sink: Arc<dyn InspectSink>,
    pub(crate) flushing: bool,
}

/// State shared by a [`Runtime`] and every handle it creates.
pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    pub(crate) state: Mutex<RuntimeState>,
}

/// Guard for one context frame.
///
/// Pops the frame when dropped, so the stack stays balanced even if the
/// computation unwinds.
pub(crate) struct FrameGuard<'a> {
    shared: &'a Shared,
    depth: usize,
    finished: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return the nodes read while it was active.
    pub(crate) fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.shared
            .state
            .lock()
            .context
            .pop_to(self.depth)
            .map(|frame| frame.into_reads())
            .unwrap_or_default()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.state.lock().context.pop_to(self.depth);
        }
    }
}

impl Shared {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RuntimeState {
                graph: DependencyGraph::new(),
                context: ContextStack::default(),
                scheduler: Scheduler::new(),
                effects: HashMap::new(),
                scopes: HashMap::new(),
                computations: HashMap::new(),
                traced: HashMap::new(),
                sink: Arc::new(TracingSink),
                flushing: false,
            }),
        }
    }

    /// Push a context frame.
    pub(crate) fn enter(&self, kind: FrameKind, owner: Option<Owner>) -> FrameGuard<'_> {
        let depth = self.state.lock().context.push(kind, owner);
        FrameGuard {
            shared: self,
            depth,
            finished: false,
        }
    }

    /// Run `f` with reads unrecorded.
    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = self.enter(FrameKind::Untracked, None);
        let result = f();
        guard.finish();
        result
    }

    /// Record a read of `node` in the active frame, if any.
    pub(crate) fn track(&self, node: NodeId) {
        self.state.lock().context.track(node);
    }

    /// Add a node, returning its id.
    pub(crate) fn register(&self, node: Node) -> NodeId {
        self.state.lock().graph.add_node(node)
    }

    /// Forget a node whose handle was dropped.
    pub(crate) fn release(&self, node: NodeId) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.graph.remove_node(node);
        st.computations.remove(&node);
        st.traced.remove(&node);
    }

    /// Propagate a value change of `cell` and queue the affected effects.
    pub(crate) fn propagate_write(
        &self,
        cell: NodeId,
        version: u64,
        location: &'static Location<'static>,
    ) {
        let (origin, sink) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            for effect in st.graph.mark_changed(cell) {
                let Some(phase) = st.effects.get(&effect).map(EffectSlot::phase) else {
                    continue;
                };
                if st.scheduler.enqueue(effect, phase) {
                    tracing::trace!(%cell, %effect, ?phase, "effect scheduled");
                }
            }

            (st.traced.get(&cell).copied(), st.sink.clone())
        };

        if let Some(origin) = origin {
            sink.emit(&InspectEvent::mutation(cell, version, location, origin));
        }
    }

    /// Whether any direct dependency of `node` produced a new value since
    /// `node` was last verified. Derived dependencies are refreshed first.
    pub(crate) fn dependencies_changed(&self, node: NodeId) -> Result<bool, ReactiveError> {
        let (deps, verified_at) = {
            let st = self.state.lock();
            match st.graph.get_node(node) {
                Some(n) => (n.dependencies().clone(), n.verified_at()),
                None => return Ok(true),
            }
        };

        for dep in deps {
            let computation = self
                .state
                .lock()
                .computations
                .get(&dep)
                .and_then(Weak::upgrade);
            if let Some(computation) = computation {
                computation.refresh()?;
            }

            let changed_at = self.state.lock().graph.get_node(dep).map(Node::changed_at);
            match changed_at {
                Some(at) if at <= verified_at => {}
                // A dependency that left the graph counts as changed
                _ => return Ok(true),
            }
        }

        Ok(false)
    }

    /// Decide whether a queued effect has to run.
    fn needs_run(&self, effect: NodeId) -> bool {
        let dirty = {
            let st = self.state.lock();
            if !st.effects.contains_key(&effect) {
                return false;
            }
            st.graph.get_node(effect).map(Node::dirty_state)
        };

        match dirty {
            Some(DirtyState::Dirty) => true,
            Some(DirtyState::MaybeDirty) => match self.dependencies_changed(effect) {
                Ok(true) => true,
                Ok(false) => {
                    let mut guard = self.state.lock();
                    let st = &mut *guard;
                    let revision = st.graph.revision();
                    if let Some(node) = st.graph.get_node_mut(effect) {
                        node.mark_clean(revision);
                    }
                    false
                }
                // Let the body run into the failure so it is reported for this effect
                Err(_) => true,
            },
            Some(DirtyState::Clean) | None => false,
        }
    }

    /// Drain one phase in passes, collecting per-effect failures.
    fn drain(&self, phase: Phase) -> Vec<ReactiveError> {
        let limit = self.config.max_flush_passes;
        let mut errors = Vec::new();
        let mut passes = 0;

        loop {
            let batch = self.state.lock().scheduler.take(phase);
            if batch.is_empty() {
                break;
            }

            if passes >= limit {
                let effects: Vec<NodeId> = batch.into_iter().collect();
                tracing::warn!(?phase, passes, pending = effects.len(), "runaway update");
                errors.push(ReactiveError::RunawayUpdate {
                    phase,
                    passes,
                    effects,
                });
                break;
            }
            passes += 1;

            tracing::trace!(?phase, pass = passes, effects = batch.len(), "flush pass");
            for effect in batch {
                if !self.needs_run(effect) {
                    continue;
                }
                if let Err(err) = self.run_effect(effect) {
                    tracing::debug!(%effect, error = %err, "effect failed");
                    errors.push(err);
                }
            }
        }

        if passes > 0 {
            tracing::debug!(?phase, passes, failures = errors.len(), "flush complete");
        }
        errors
    }

    /// Run `f` as the only flush in progress. Returns `None` if a flush is
    /// already running further up the stack.
    fn exclusive_flush<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        {
            let mut st = self.state.lock();
            if st.flushing {
                return None;
            }
            st.flushing = true;
        }

        struct Reset<'a>(&'a Shared);
        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                self.0.state.lock().flushing = false;
            }
        }

        let _reset = Reset(self);
        Some(f())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Tearing down the runtime unmounts everything still alive
        let effects = std::mem::take(&mut self.state.get_mut().effects);
        for (id, slot) in effects {
            slot.teardown(id);
        }
    }
}

/// Handle to one reactive runtime.
///
/// Cloning the handle is cheap and every clone refers to the same graph.
/// Cells, derived values and effects created through a runtime only track
/// reads within that runtime.
///
/// Dropping the last handle runs the cleanups of every live effect. An effect
/// body that captures a `Runtime` clone keeps the runtime alive, so hosts that
/// create effects from inside effects should call [`Runtime::dispose`] when
/// they unmount.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use runic_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.state(0);
///
/// let doubled = {
///     let count = count.clone();
///     rt.derived(move || count.get() * 2)
/// };
///
/// let seen = Arc::new(AtomicI32::new(-1));
/// let seen_clone = seen.clone();
/// let doubled_clone = doubled.clone();
/// rt.effect(move || seen_clone.store(doubled_clone.get(), Ordering::SeqCst));
///
/// count.set(5);
/// rt.flush().unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Check if we're inside a tracked computation.
    ///
    /// True while a derived formula or an effect body is executing, false at
    /// top level, during scope setup and inside [`Runtime::untrack`].
    pub fn is_tracking(&self) -> bool {
        self.shared.state.lock().context.is_tracking()
    }

    /// Run `f` without recording any of its reads.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.untracked(f)
    }

    /// Run one full update: PRE effects, then `render`, then POST effects.
    ///
    /// `render` is where the host applies pending visual changes. Failures of
    /// individual effects do not stop the others; they are returned together
    /// once both phases have drained. Calling `tick` from inside a running
    /// flush does nothing, since the running flush picks up new work itself.
    pub fn tick(&self, render: impl FnOnce()) -> Result<(), ReactiveError> {
        let outcome = self.shared.exclusive_flush(|| {
            let mut errors = self.shared.drain(Phase::Pre);
            render();
            errors.extend(self.shared.drain(Phase::Post));
            errors
        });

        match outcome {
            Some(errors) => ReactiveError::from_multiple(errors).map_or(Ok(()), Err),
            None => {
                tracing::debug!("tick requested during a flush, deferring to the running flush");
                Ok(())
            }
        }
    }

    /// Run one update with no render step.
    pub fn flush(&self) -> Result<(), ReactiveError> {
        self.tick(|| {})
    }

    /// Drain a single phase.
    pub fn flush_phase(&self, phase: Phase) -> Result<(), ReactiveError> {
        let errors = self
            .shared
            .exclusive_flush(|| self.shared.drain(phase))
            .unwrap_or_default();
        ReactiveError::from_multiple(errors).map_or(Ok(()), Err)
    }

    /// Whether any effect is waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.shared.state.lock().scheduler.is_empty()
    }

    /// Number of effects waiting in `phase`.
    pub fn pending(&self, phase: Phase) -> usize {
        self.shared.state.lock().scheduler.pending(phase)
    }

    /// Number of live nodes (cells, derived values and effects).
    pub fn node_count(&self) -> usize {
        self.shared.state.lock().graph.node_count()
    }

    /// Replace the sink that receives instrumentation events.
    pub fn set_inspect_sink(&self, sink: Arc<dyn InspectSink>) {
        self.shared.state.lock().sink = sink;
    }

    /// Dispose every live effect and scope, running each pending cleanup once
    /// and dropping the effect bodies.
    ///
    /// Cells and derived values keep working. Calling this again does nothing
    /// unless new effects were created in between.
    pub fn dispose(&self) {
        self.shared.dispose_all();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("Runtime")
            .field("nodes", &st.graph.node_count())
            .field("effects", &st.effects.len())
            .field("pending_pre", &st.scheduler.pending(Phase::Pre))
            .field("pending_post", &st.scheduler.pending(Phase::Post))
            .finish()
    }
}

/// Number of nodes that read `node`.
pub(crate) fn subscriber_count(runtime: &Weak<Shared>, node: NodeId) -> usize {
    runtime
        .upgrade()
        .and_then(|rt| rt.state.lock().graph.get_node(node).map(|n| n.dependents().len()))
        .unwrap_or(0)
}

/// Number of nodes `node` read during its last run.
pub(crate) fn dependency_count(runtime: &Weak<Shared>, node: NodeId) -> usize {
    runtime
        .upgrade()
        .and_then(|rt| rt.state.lock().graph.get_node(node).map(|n| n.dependencies().len()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn runtime_registers_and_releases() {
        let rt = Runtime::new();
        let id = rt.shared().register(Node::source());

        assert_eq!(rt.node_count(), 1);

        rt.shared().release(id);
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn frame_guard_pops_on_unwind() {
        let rt = Runtime::new();
        let shared = rt.shared().clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = shared.enter(FrameKind::Effect(NodeId::new()), None);
            panic!("body failed");
        }));

        assert!(result.is_err());
        assert!(!rt.is_tracking());
        assert_eq!(rt.shared().state.lock().context.depth(), 0);
    }

    #[test]
    fn untrack_hides_reads() {
        let rt = Runtime::new();
        let cell = rt.shared().register(Node::source());
        let shared = rt.shared().clone();

        let guard = shared.enter(FrameKind::Effect(NodeId::new()), None);
        assert!(rt.is_tracking());
        rt.untrack(|| {
            assert!(!rt.is_tracking());
            shared.track(cell);
        });
        let reads = guard.finish();

        assert!(reads.is_empty());
    }

    #[test]
    fn nested_tick_is_deferred() {
        let rt = Runtime::new();
        let renders = Arc::new(AtomicI32::new(0));

        let inner_rt = rt.clone();
        let renders_clone = renders.clone();
        rt.tick(move || {
            renders_clone.fetch_add(1, Ordering::SeqCst);
            let renders_inner = renders_clone.clone();
            inner_rt
                .tick(move || {
                    renders_inner.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        })
        .unwrap();

        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }
}
