//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued for its phase and
//!    re-runs on the next flush, once, however many writes happened.
//!
//! 3. Before re-running, the effect disposes the effects it created last
//!    time and runs its previous cleanup. The dependencies read during the
//!    new run replace the old ones.
//!
//! # Phases
//!
//! `Pre` effects run before the host's render step, `Post` effects after it.
//! That is the only difference between [`Runtime::effect_pre`] and
//! [`Runtime::effect`].
//!
//! # Cleanup
//!
//! A body may return a [`Cleanup`]. It runs exactly once: before the next run
//! of the body, or when the effect is disposed, whichever comes first.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;

use smallvec::SmallVec;

use super::context::{FrameKind, Owner};
use super::runtime::{dependency_count, Runtime, Shared};
use crate::error::{panic_message, ReactiveError};
use crate::graph::{Node, NodeId, Phase};

/// Type-erased effect body, already converted to the cleanup protocol.
type EffectBody = Box<dyn FnMut() -> Result<Option<Cleanup>, String> + Send>;

/// Teardown callback returned by an effect body.
pub struct Cleanup(Box<dyn FnOnce() + Send>);

impl Cleanup {
    /// Wrap a closure to run before the next run of the effect, or when it
    /// is disposed.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Run the cleanup, turning a panic into an error for `effect`.
    pub(crate) fn run(self, effect: NodeId) -> Result<(), ReactiveError> {
        panic::catch_unwind(AssertUnwindSafe(self.0)).map_err(|payload| {
            ReactiveError::EffectBody {
                node: effect,
                message: format!("cleanup panicked: {}", panic_message(payload.as_ref())),
            }
        })
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

/// What an effect body may return.
///
/// - `()` - no cleanup
/// - [`Cleanup`] or `Option<Cleanup>`
/// - `Result<O, E>` - an `Err` fails the run like a panic would, without
///   unwinding
pub trait EffectOutput {
    /// Convert into the optional cleanup, or a failure message.
    fn into_cleanup(self) -> Result<Option<Cleanup>, String>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> Result<Option<Cleanup>, String> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> Result<Option<Cleanup>, String> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> Result<Option<Cleanup>, String> {
        Ok(self)
    }
}

impl<O, E> EffectOutput for Result<O, E>
where
    O: EffectOutput,
    E: fmt::Display,
{
    fn into_cleanup(self) -> Result<Option<Cleanup>, String> {
        self.map_err(|err| err.to_string())
            .and_then(EffectOutput::into_cleanup)
    }
}

/// Runtime-side record of one live effect.
///
/// An effect is active exactly as long as its slot exists.
pub(crate) struct EffectSlot {
    phase: Phase,
    /// `None` while the body is running.
    body: Option<EffectBody>,
    cleanup: Option<Cleanup>,
    /// Effects created by the last run, disposed before the next one.
    children: SmallVec<[NodeId; 4]>,
    owner: Option<Owner>,
    runs: usize,
}

impl EffectSlot {
    fn new(phase: Phase, body: EffectBody, owner: Option<Owner>) -> Self {
        Self {
            phase,
            body: Some(body),
            cleanup: None,
            children: SmallVec::new(),
            owner,
            runs: 0,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the pending cleanup and drop the body. Only for runtime teardown.
    pub(crate) fn teardown(self, id: NodeId) {
        if let Some(cleanup) = self.cleanup {
            if let Err(err) = cleanup.run(id) {
                tracing::warn!(error = %err, "cleanup failed during runtime teardown");
            }
        }
    }
}

impl Shared {
    /// Run an effect: dispose its children, run the previous cleanup, run
    /// the body under a fresh frame and commit what it read.
    pub(crate) fn run_effect(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (revision, children, cleanup, mut body) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let revision = st.graph.revision();

            let Some(slot) = st.effects.get_mut(&id) else {
                return Ok(());
            };
            let Some(body) = slot.body.take() else {
                // Already running further up the stack
                return Ok(());
            };
            slot.runs += 1;
            let children = std::mem::take(&mut slot.children);
            let cleanup = slot.cleanup.take();

            // Clean before the body runs, so writes made by the body can dirty it again
            if let Some(node) = st.graph.get_node_mut(id) {
                node.mark_clean(revision);
            }
            (revision, children, cleanup, body)
        };

        tracing::trace!(effect = %id, "running effect");

        for child in children {
            self.dispose_effect(child);
        }

        let mut failure = None;
        if let Some(cleanup) = cleanup {
            failure = self.run_cleanup(cleanup, id).err();
        }

        let frame = self.enter(FrameKind::Effect(id), Some(Owner::Effect(id)));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body()));
        let reads = frame.finish();

        let (new_cleanup, body_failure) = match outcome {
            Ok(Ok(cleanup)) => (cleanup, None),
            Ok(Err(message)) => (None, Some(ReactiveError::EffectBody { node: id, message })),
            Err(payload) => (
                None,
                Some(ReactiveError::from_panic(payload, |message| {
                    ReactiveError::EffectBody { node: id, message }
                })),
            ),
        };

        let orphaned = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            st.graph.replace_dependencies(id, reads);

            // A dependency that changed during this run was read stale
            let stale = st.graph.get_node(id).is_some_and(|node| {
                node.dependencies().iter().any(|dep| {
                    st.graph
                        .get_node(*dep)
                        .is_some_and(|d| d.changed_at() > revision)
                })
            });

            match st.effects.get_mut(&id) {
                Some(slot) => {
                    slot.body = Some(body);
                    slot.cleanup = new_cleanup;
                    if stale {
                        let phase = slot.phase;
                        if let Some(node) = st.graph.get_node_mut(id) {
                            node.mark_dirty();
                        }
                        st.scheduler.enqueue(id, phase);
                    }
                    None
                }
                // Disposed from inside its own body
                None => Some((new_cleanup, body)),
            }
        };

        if let Some((cleanup, body)) = orphaned {
            if let Some(cleanup) = cleanup {
                if let Err(err) = self.run_cleanup(cleanup, id) {
                    failure.get_or_insert(err);
                }
            }
            drop(body);
        }

        match body_failure.or(failure) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dispose an effect and everything it created. Idempotent.
    pub(crate) fn dispose_effect(&self, id: NodeId) {
        let doomed = {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            let Some(slot) = st.effects.remove(&id) else {
                return;
            };

            match slot.owner {
                Some(Owner::Effect(parent)) => {
                    if let Some(parent) = st.effects.get_mut(&parent) {
                        parent.children.retain(|child| *child != id);
                    }
                }
                Some(Owner::Scope(scope)) => {
                    if let Some(owned) = st.scopes.get_mut(&scope) {
                        owned.retain(|effect| *effect != id);
                    }
                }
                None => {}
            }

            let mut doomed = vec![(id, slot)];
            let mut next = 0;
            while next < doomed.len() {
                let children = std::mem::take(&mut doomed[next].1.children);
                for child in children {
                    if let Some(slot) = st.effects.remove(&child) {
                        doomed.push((child, slot));
                    }
                }
                next += 1;
            }

            for (effect, _) in &doomed {
                st.graph.remove_node(*effect);
                st.scheduler.remove(*effect);
            }
            doomed
        };

        tracing::trace!(effect = %id, disposed = doomed.len(), "effect disposed");

        // Descendants first, most recently created first
        for (effect, slot) in doomed.into_iter().rev() {
            let EffectSlot { cleanup, body, .. } = slot;
            if let Some(cleanup) = cleanup {
                if let Err(err) = self.run_cleanup(cleanup, effect) {
                    tracing::warn!(error = %err, "cleanup failed during disposal");
                }
            }
            drop(body);
        }
    }

    /// Run a cleanup with its reads unrecorded, whatever frame is active.
    fn run_cleanup(&self, cleanup: Cleanup, effect: NodeId) -> Result<(), ReactiveError> {
        self.untracked(|| cleanup.run(effect))
    }

    /// Dispose every live effect: top-level ones last created first, each
    /// taking its descendants with it.
    pub(crate) fn dispose_all(&self) {
        let mut roots: Vec<NodeId> = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            st.scopes.clear();
            st.effects
                .iter()
                .filter(|(_, slot)| {
                    !matches!(slot.owner, Some(Owner::Effect(parent)) if st.effects.contains_key(&parent))
                })
                .map(|(id, _)| *id)
                .collect()
        };
        roots.sort_unstable();

        tracing::debug!(effects = roots.len(), "disposing runtime");

        for id in roots.into_iter().rev() {
            self.dispose_effect(id);
        }
    }
}

/// Handle to a registered effect.
///
/// Dropping the handle does not dispose the effect; it stays alive until it
/// is disposed explicitly, its parent re-runs, its scope is disposed, or the
/// runtime is disposed or dropped.
#[derive(Clone)]
pub struct EffectHandle {
    id: NodeId,
    phase: Phase,
    runtime: Weak<Shared>,
}

impl EffectHandle {
    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The phase this effect runs in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanup once and removes the effect from the graph
    /// and from the queue. Disposing twice does nothing.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.dispose_effect(self.id);
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |rt| !rt.state.lock().effects.contains_key(&self.id))
    }

    /// Get the number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.runtime
            .upgrade()
            .and_then(|rt| rt.state.lock().effects.get(&self.id).map(|slot| slot.runs))
            .unwrap_or(0)
    }

    /// Get the number of dependencies read by the last run.
    pub fn dependency_count(&self) -> usize {
        dependency_count(&self.runtime, self.id)
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Register an effect that runs after the render step.
    ///
    /// The body runs immediately. A failure of that first run is raised as a
    /// panic carrying the [`ReactiveError`]; use [`Runtime::try_effect`] to
    /// get it as a `Result` instead.
    pub fn effect<F, O>(&self, body: F) -> EffectHandle
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        self.try_effect(body).unwrap_or_else(|err| err.raise())
    }

    /// Register an effect that runs before the render step.
    pub fn effect_pre<F, O>(&self, body: F) -> EffectHandle
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        self.try_effect_pre(body).unwrap_or_else(|err| err.raise())
    }

    /// Like [`Runtime::effect`], returning a failed first run as an error.
    ///
    /// An effect whose first run fails is disposed before this returns. An
    /// effect created under an owner that has already been disposed (an
    /// effect that disposed itself earlier in the same run) is never
    /// registered; the returned handle reports it as disposed.
    pub fn try_effect<F, O>(&self, body: F) -> Result<EffectHandle, ReactiveError>
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        self.create_effect(Phase::Post, body)
    }

    /// Like [`Runtime::effect_pre`], returning a failed first run as an error.
    pub fn try_effect_pre<F, O>(&self, body: F) -> Result<EffectHandle, ReactiveError>
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        self.create_effect(Phase::Pre, body)
    }

    fn create_effect<F, O>(&self, phase: Phase, mut body: F) -> Result<EffectHandle, ReactiveError>
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        let shared = self.shared();
        let body: EffectBody = Box::new(move || body().into_cleanup());

        let registered = {
            let mut guard = shared.state.lock();
            let st = &mut *guard;
            let owner = st.context.current_owner();

            let owned_by = match owner {
                Some(Owner::Effect(parent)) => {
                    st.effects.get_mut(&parent).map(|parent| &mut parent.children)
                }
                Some(Owner::Scope(scope)) => st.scopes.get_mut(&scope),
                None => None,
            };

            match (owner, owned_by) {
                (Some(_), None) => Err(body),
                (_, owned_by) => {
                    let id = st.graph.add_node(Node::effect());
                    if let Some(owned_by) = owned_by {
                        owned_by.push(id);
                    }
                    st.effects.insert(id, EffectSlot::new(phase, body, owner));
                    Ok(id)
                }
            }
        };

        let id = match registered {
            Ok(id) => id,
            Err(body) => {
                drop(body);
                tracing::debug!(?phase, "owner already disposed, effect not created");
                return Ok(EffectHandle {
                    id: NodeId::new(),
                    phase,
                    runtime: std::sync::Arc::downgrade(shared),
                });
            }
        };

        tracing::trace!(effect = %id, ?phase, "effect created");

        if let Err(err) = shared.run_effect(id) {
            shared.dispose_effect(id);
            return Err(err);
        }

        Ok(EffectHandle {
            id,
            phase,
            runtime: std::sync::Arc::downgrade(shared),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = rt.effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.phase(), Phase::Post);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let rt = Runtime::new();
        let cell = rt.state(1);
        let seen = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let seen_clone = seen.clone();
        let effect = rt.effect(move || {
            seen_clone.store(cell_clone.get(), Ordering::SeqCst);
        });

        cell.set(2);
        // Nothing runs until the flush
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        rt.flush().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let rt = Runtime::new();
        let cell = rt.state(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let run_count_clone = run_count.clone();
        let effect = rt.effect(move || {
            cell_clone.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        effect.dispose();
        assert!(effect.is_disposed());

        cell.set(1);
        rt.flush().unwrap();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(cell.subscriber_count(), 0);

        // Disposing again is a no-op
        effect.dispose();
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_disposal() {
        let rt = Runtime::new();
        let cell = rt.state(0);
        let cleanups = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let cleanups_clone = cleanups.clone();
        let effect = rt.effect(move || {
            cell_clone.get();
            let cleanups = cleanups_clone.clone();
            Cleanup::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            })
        });
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        cell.set(1);
        rt.flush().unwrap();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);

        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn err_output_fails_the_run() {
        let rt = Runtime::new();

        let result = rt.try_effect(|| -> Result<(), String> { Err("no device".to_string()) });

        match result {
            Err(ReactiveError::EffectBody { message, .. }) => assert_eq!(message, "no device"),
            other => panic!("unexpected result: {other:?}"),
        }
        // The failed effect was disposed
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn nested_effects_are_recreated_with_parent() {
        let rt = Runtime::new();
        let cell = rt.state(0);
        let child_cleanups = Arc::new(AtomicI32::new(0));
        let child_runs = Arc::new(AtomicI32::new(0));

        let inner_rt = rt.clone();
        let cell_clone = cell.clone();
        let child_cleanups_clone = child_cleanups.clone();
        let child_runs_clone = child_runs.clone();
        let parent = rt.effect(move || {
            cell_clone.get();
            let cleanups = child_cleanups_clone.clone();
            let runs = child_runs_clone.clone();
            inner_rt.effect(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let cleanups = cleanups.clone();
                Cleanup::new(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                })
            });
        });
        assert_eq!(child_runs.load(Ordering::SeqCst), 1);
        // parent + child + cell
        assert_eq!(rt.node_count(), 3);

        cell.set(1);
        rt.flush().unwrap();
        assert_eq!(child_cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(child_runs.load(Ordering::SeqCst), 2);
        assert_eq!(rt.node_count(), 3);

        parent.dispose();
        assert_eq!(child_cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(rt.node_count(), 1);
    }

    #[test]
    fn self_disposal_runs_returned_cleanup() {
        let rt = Runtime::new();
        let cleanups = Arc::new(AtomicI32::new(0));
        let slot: Arc<parking_lot::Mutex<Option<EffectHandle>>> = Arc::default();
        let trigger = rt.state(false);

        let slot_clone = slot.clone();
        let trigger_clone = trigger.clone();
        let cleanups_clone = cleanups.clone();
        let effect = rt.effect(move || {
            if trigger_clone.get() {
                if let Some(me) = slot_clone.lock().as_ref() {
                    me.dispose();
                }
            }
            let cleanups = cleanups_clone.clone();
            Cleanup::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            })
        });
        *slot.lock() = Some(effect.clone());

        trigger.set(true);
        rt.flush().unwrap();

        assert!(effect.is_disposed());
        // One before the rerun, one for the cleanup returned by the disposed run
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runtime_drop_runs_pending_cleanups() {
        let rt = Runtime::new();
        let cleanups = Arc::new(AtomicI32::new(0));

        let cleanups_clone = cleanups.clone();
        rt.effect(move || {
            let cleanups = cleanups_clone.clone();
            Cleanup::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            })
        });

        drop(rt);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
    #[test]
    fn cleanup_reads_do_not_subscribe_the_disposing_effect() {
        let rt = Runtime::new();
        let watched = rt.state(1);
        let trigger = rt.state(false);
        let cleanup_seen = Arc::new(AtomicI32::new(0));

        let watched_clone = watched.clone();
        let cleanup_seen_clone = cleanup_seen.clone();
        let victim = rt.effect(move || {
            let watched = watched_clone.clone();
            let seen = cleanup_seen_clone.clone();
            Cleanup::new(move || {
                seen.store(watched.get(), Ordering::SeqCst);
            })
        });

        let disposer_runs = Arc::new(AtomicI32::new(0));
        let trigger_clone = trigger.clone();
        let victim_clone = victim.clone();
        let disposer_runs_clone = disposer_runs.clone();
        let disposer = rt.effect(move || {
            disposer_runs_clone.fetch_add(1, Ordering::SeqCst);
            if trigger_clone.get() {
                victim_clone.dispose();
            }
        });

        trigger.set(true);
        rt.flush().unwrap();

        assert!(victim.is_disposed());
        assert_eq!(cleanup_seen.load(Ordering::SeqCst), 1);
        assert_eq!(disposer.dependency_count(), 1);
        assert_eq!(watched.subscriber_count(), 0);

        watched.set(2);
        assert!(!rt.has_pending());
        rt.flush().unwrap();
        assert_eq!(disposer_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rerun_cleanup_reads_are_not_dependencies() {
        let rt = Runtime::new();
        let cell = rt.state(0);
        let watched = rt.state(10);

        let cell_clone = cell.clone();
        let watched_clone = watched.clone();
        let effect = rt.effect(move || {
            cell_clone.get();
            let watched = watched_clone.clone();
            Cleanup::new(move || {
                watched.get();
            })
        });

        cell.set(1);
        rt.flush().unwrap();

        assert_eq!(effect.run_count(), 2);
        assert_eq!(effect.dependency_count(), 1);
        assert_eq!(watched.subscriber_count(), 0);
    }

    #[test]
    fn child_created_after_parent_disposed_itself_never_runs() {
        let rt = Runtime::new();
        let trigger = rt.state(false);
        let dep = rt.state(0);
        let child_runs = Arc::new(AtomicI32::new(0));
        let slot: Arc<parking_lot::Mutex<Option<EffectHandle>>> = Arc::default();
        let child: Arc<parking_lot::Mutex<Option<EffectHandle>>> = Arc::default();

        let rt_clone = rt.clone();
        let trigger_clone = trigger.clone();
        let dep_clone = dep.clone();
        let slot_clone = slot.clone();
        let child_clone = child.clone();
        let child_runs_clone = child_runs.clone();
        let parent = rt.effect(move || {
            if !trigger_clone.get() {
                return;
            }
            let me = slot_clone.lock().clone();
            if let Some(me) = me {
                me.dispose();
            }
            let dep = dep_clone.clone();
            let runs = child_runs_clone.clone();
            let handle = rt_clone.effect(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                dep.get();
            });
            *child_clone.lock() = Some(handle);
        });
        *slot.lock() = Some(parent.clone());

        trigger.set(true);
        rt.flush().unwrap();

        assert!(parent.is_disposed());
        let handle = child.lock().clone().unwrap();
        assert!(handle.is_disposed());
        assert_eq!(child_runs.load(Ordering::SeqCst), 0);
        assert_eq!(dep.subscriber_count(), 0);
        assert_eq!(rt.node_count(), 2);

        dep.set(1);
        rt.flush().unwrap();
        assert_eq!(child_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runtime_dispose_breaks_handle_cycles() {
        let rt = Runtime::new();
        let token = Arc::new(());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let rt_clone = rt.clone();
        let token_clone = token.clone();
        let order_clone = order.clone();
        let parent = rt.effect(move || {
            let _held = &token_clone;
            let child_order = order_clone.clone();
            let child_token = token_clone.clone();
            rt_clone.effect(move || {
                let order = child_order.clone();
                let token = child_token.clone();
                Cleanup::new(move || {
                    let _held = token;
                    order.lock().push("child");
                })
            });
            let order = order_clone.clone();
            Cleanup::new(move || {
                order.lock().push("parent");
            })
        });
        assert!(Arc::strong_count(&token) > 1);

        rt.dispose();

        assert!(parent.is_disposed());
        assert_eq!(*order.lock(), vec!["child", "parent"]);
        assert_eq!(Arc::strong_count(&token), 1);
        assert_eq!(rt.node_count(), 0);

        rt.dispose();
        assert_eq!(order.lock().len(), 2);
    }
}
