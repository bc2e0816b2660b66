//! Root scopes: the mount/unmount boundary for effects.
//!
//! Effects created directly inside [`Runtime::root`] belong to the returned
//! [`Scope`]. Disposing the scope disposes them, their children and so on,
//! running every pending cleanup once. Dropping the last handle without
//! disposing detaches the effects instead: they stay alive with no owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use super::context::{FrameKind, Owner};
use super::runtime::{Runtime, Shared};

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a root scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        Self(SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct ScopeInner {
    id: ScopeId,
    runtime: Weak<Shared>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(rt) = self.runtime.upgrade() {
            if let Some(owned) = rt.state.lock().scopes.remove(&self.id) {
                tracing::trace!(
                    scope = ?self.id,
                    effects = owned.len(),
                    "scope dropped, effects detached"
                );
            }
        }
    }
}

/// Owner of the effects created while it was being set up.
///
/// Clones share one scope. The runtime forgets the scope once the last clone
/// is dropped.
#[derive(Debug, Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Identifier of this scope, shared by all its clones.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Dispose every effect the scope owns. Calling this again does nothing.
    pub fn dispose(&self) {
        let Some(rt) = self.inner.runtime.upgrade() else {
            return;
        };
        let Some(owned) = rt.state.lock().scopes.remove(&self.inner.id) else {
            return;
        };

        tracing::debug!(scope = ?self.inner.id, effects = owned.len(), "disposing scope");

        // Last created first
        for effect in owned.into_iter().rev() {
            rt.dispose_effect(effect);
        }
    }

    /// Whether the scope, or its whole runtime, has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner
            .runtime
            .upgrade()
            .map_or(true, |rt| !rt.state.lock().scopes.contains_key(&self.inner.id))
    }

    /// Number of effects directly owned by the scope.
    pub fn effect_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .and_then(|rt| rt.state.lock().scopes.get(&self.inner.id).map(|owned| owned.len()))
            .unwrap_or(0)
    }
}

impl Runtime {
    /// Run `setup` in a fresh root scope.
    ///
    /// Reads inside `setup` are not tracked. Effects created directly inside
    /// it are owned by the returned scope until it is disposed.
    pub fn root<R>(&self, setup: impl FnOnce() -> R) -> (R, Scope) {
        let shared = self.shared();
        let id = ScopeId::new();
        shared.state.lock().scopes.insert(id, Default::default());

        let frame = shared.enter(FrameKind::Untracked, Some(Owner::Scope(id)));
        let result = setup();
        frame.finish();

        let scope = Scope {
            inner: Arc::new(ScopeInner {
                id,
                runtime: Arc::downgrade(shared),
            }),
        };
        (result, scope)
    }
}
