//! Effect Scopes
//!
//! A scope groups effects, child scopes and cleanup callbacks so they can
//! be disposed of together. Scopes do not own their effects: the creator
//! of an effect keeps it alive, the scope only remembers it in order to
//! stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ScopeContext;
use super::effect::{Effect, EffectInner};
use super::runtime::Runtime;
use crate::error::ErrorCode;

/// A member of a scope, held weakly.
pub(crate) enum ScopeChild {
    Effect(Weak<EffectInner>),
    Scope(Weak<ScopeInner>),
}

impl ScopeChild {
    fn is_alive(&self) -> bool {
        match self {
            ScopeChild::Effect(weak) => weak.strong_count() > 0,
            ScopeChild::Scope(weak) => weak.strong_count() > 0,
        }
    }

    fn stop(&self) {
        match self {
            ScopeChild::Effect(weak) => {
                if let Some(effect) = Effect::upgrade(weak) {
                    effect.stop();
                }
            }
            ScopeChild::Scope(weak) => {
                if let Some(inner) = weak.upgrade() {
                    EffectScope(inner).stop_from_parent();
                }
            }
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

pub(crate) struct ScopeInner {
    runtime: Runtime,
    active: AtomicBool,
    children: Mutex<Vec<ScopeChild>>,
    cleanups: Mutex<Vec<Cleanup>>,
    parent: Option<Weak<ScopeInner>>,
}

/// A group of effects and cleanups that are stopped together.
///
/// # Example
///
/// ```rust
/// use tether_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(0);
/// let scope = rt.effect_scope(false);
///
/// let c = count.clone();
/// let effect = scope
///     .run(|| rt.effect(move || { c.get(); }))
///     .expect("scope is active");
///
/// scope.stop();
/// assert!(!effect.is_active());
/// ```
#[derive(Clone)]
pub struct EffectScope(Arc<ScopeInner>);

impl EffectScope {
    fn new(runtime: &Runtime, detached: bool) -> Self {
        let parent = if detached {
            None
        } else {
            runtime.current_scope()
        };
        let scope = Self(Arc::new(ScopeInner {
            runtime: runtime.clone(),
            active: AtomicBool::new(true),
            children: Mutex::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
            parent: parent.as_ref().map(|p| Arc::downgrade(&p.0)),
        }));
        if let Some(parent) = parent {
            parent.record(ScopeChild::Scope(Arc::downgrade(&scope.0)));
        }
        scope
    }

    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of effects and child scopes still alive in this scope.
    pub fn child_count(&self) -> usize {
        self.0.children.lock().iter().filter(|c| c.is_alive()).count()
    }

    /// Run `f` with this scope current. Returns `None` if the scope was stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            tracing::warn!("cannot run an inactive effect scope");
            return None;
        }
        let _current = ScopeContext::enter(self);
        Some(f())
    }

    /// Make this scope current.
    pub fn on(&self) {
        self.0.runtime.0.scope_stack.lock().push(self.clone());
    }

    /// Undo the matching [`EffectScope::on`].
    pub fn off(&self) {
        let mut stack = self.0.runtime.0.scope_stack.lock();
        if let Some(pos) = stack.iter().rposition(|s| s.ptr_eq(self)) {
            stack.remove(pos);
        }
    }

    /// Stop every effect and child scope, then run the cleanups. Idempotent.
    pub fn stop(&self) {
        if !self.is_active() {
            tracing::warn!("effect scope is already stopped");
            return;
        }
        self.dispose();
        if let Some(parent) = self.0.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .lock()
                .retain(|c| !matches!(c, ScopeChild::Scope(w) if w.as_ptr() == Arc::as_ptr(&self.0)));
        }
    }

    fn stop_from_parent(&self) {
        if self.is_active() {
            self.dispose();
        }
    }

    fn dispose(&self) {
        let children = std::mem::take(&mut *self.0.children.lock());
        for child in &children {
            child.stop();
        }

        let cleanups = std::mem::take(&mut *self.0.cleanups.lock());
        for cleanup in cleanups {
            self.0.runtime.call(ErrorCode::ScopeCleanup, cleanup);
        }

        self.0.active.store(false, Ordering::SeqCst);
        tracing::debug!(children = children.len(), "effect scope stopped");
    }

    fn record(&self, child: ScopeChild) {
        let mut children = self.0.children.lock();
        children.retain(ScopeChild::is_alive);
        children.push(child);
    }

    fn add_cleanup(&self, cleanup: Cleanup) {
        self.0.cleanups.lock().push(cleanup);
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("children", &self.child_count())
            .field("cleanups", &self.0.cleanups.lock().len())
            .finish()
    }
}

/// Register `child` with `scope`, or with the current scope if none is given.
pub(crate) fn record_effect_scope(runtime: &Runtime, child: ScopeChild, scope: Option<&EffectScope>) {
    let scope = match scope {
        Some(scope) => Some(scope.clone()),
        None => runtime.current_scope(),
    };
    if let Some(scope) = scope {
        if scope.is_active() {
            scope.record(child);
        }
    }
}

impl Runtime {
    /// Create a scope. A non-detached scope is collected by the current scope.
    pub fn effect_scope(&self, detached: bool) -> EffectScope {
        EffectScope::new(self, detached)
    }

    pub fn current_scope(&self) -> Option<EffectScope> {
        self.0.scope_stack.lock().last().cloned()
    }

    /// Run `f` when the current scope stops. Dropped with a warning if there
    /// is no current scope.
    pub fn on_scope_dispose(&self, f: impl FnOnce() + Send + 'static) {
        match self.current_scope() {
            Some(scope) => scope.add_cleanup(Box::new(f)),
            None => tracing::warn!(
                "on_scope_dispose() is called when there is no active effect scope to be associated with"
            ),
        }
    }
}
