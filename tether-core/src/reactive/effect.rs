//! Effect Implementation
//!
//! An Effect is a re-runnable computation that subscribes to exactly the
//! keys it read during its most recent run.
//!
//! # How Effects Work
//!
//! 1. Unless created lazily, the effect runs once immediately to establish
//!    its initial dependencies.
//!
//! 2. During a run, every tracked read subscribes the effect to that key's
//!    `Dep`. Keys read in the previous run but not in this one are
//!    unsubscribed when the run finishes, so a branch that stops reading a
//!    key also stops reacting to it.
//!
//! 3. When a dependency is written, the effect re-runs, or its scheduler is
//!    called instead. The scheduler is the only deferral seam: whatever
//!    queueing policy the caller wants lives there.
//!
//! # Lifecycle
//!
//! [`Effect::stop`] is terminal. A stopped effect is detached from every
//! `Dep` and is never woken again. Dropping the last handle to an effect has
//! the same effect on its subscriptions, without running `on_stop`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::{ReactiveContext, TrackingPause};
use super::runtime::Runtime;
use super::scope::{record_effect_scope, EffectScope, ScopeChild};
use super::subscriber::{DebuggerEvent, DebuggerHook, EventInfo, SubscriberId};
use crate::error::ErrorCode;
use crate::graph::{Dep, DepId, Value};

/// Called instead of re-running an effect when one of its dependencies changes.
pub type SchedulerFn = Arc<dyn Fn(&Effect) + Send + Sync>;

/// Options for [`Runtime::effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,
    pub scheduler: Option<SchedulerFn>,
    /// Register with this scope instead of the current one.
    pub scope: Option<EffectScope>,
    /// Allow the effect to be triggered by its own writes.
    pub allow_recurse: bool,
    pub on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_track: Option<DebuggerHook>,
    pub on_trigger: Option<DebuggerHook>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn scheduler(mut self, scheduler: impl Fn(&Effect) + Send + Sync + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn scope(mut self, scope: &EffectScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    pub fn on_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(f));
        self
    }

    pub fn on_track(mut self, f: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_track = Some(Arc::new(f));
        self
    }

    pub fn on_trigger(mut self, f: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_trigger = Some(Arc::new(f));
        self
    }
}

/// Dependencies collected during the run in progress.
struct TrackFrame {
    previous: HashSet<DepId>,
    tracked: IndexMap<DepId, Dep>,
}

pub struct EffectInner {
    id: SubscriberId,
    runtime: Runtime,
    func: Box<dyn Fn() -> Value + Send + Sync>,
    active: AtomicBool,
    scheduler: Option<SchedulerFn>,
    allow_recurse: bool,
    deps: Mutex<IndexMap<DepId, Dep>>,
    frame: Mutex<Option<TrackFrame>>,
    on_stop: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    on_track: Option<DebuggerHook>,
    on_trigger: Option<DebuggerHook>,
    run_count: AtomicUsize,
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().values() {
            dep.unsubscribe(self.id);
        }
    }
}

/// A re-runnable computation. Cloning shares the same effect.
///
/// # Example
///
/// ```rust
/// use tether_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(0);
///
/// let c = count.clone();
/// let effect = rt.effect(move || {
///     println!("Count is: {:?}", c.get());
/// });
///
/// count.set(5); // Prints: "Count is: Number(5)"
/// effect.stop();
/// ```
#[must_use = "dropping the handle detaches the effect"]
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    pub(crate) fn new<F, R>(runtime: &Runtime, func: F, options: &EffectOptions) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        Self {
            inner: Arc::new(EffectInner {
                id: SubscriberId::new(),
                runtime: runtime.clone(),
                func: Box::new(move || func().into()),
                active: AtomicBool::new(true),
                scheduler: options.scheduler.clone(),
                allow_recurse: options.allow_recurse,
                deps: Mutex::new(IndexMap::new()),
                frame: Mutex::new(None),
                on_stop: Mutex::new(options.on_stop.clone()),
                on_track: options.on_track.clone(),
                on_trigger: options.on_trigger.clone(),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn allows_recurse(&self) -> bool {
        self.inner.allow_recurse
    }

    pub fn ptr_eq(&self, other: &Effect) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the computation and return its value.
    ///
    /// A stopped effect, or one that is already running further up the
    /// stack, still runs its computation but tracks nothing.
    pub fn run(&self) -> Value {
        let runtime = &self.inner.runtime;
        if !self.is_active() || runtime.is_running(self.id()) {
            let _paused = TrackingPause::new(runtime);
            return self.call();
        }
        let _ctx = ReactiveContext::enter(runtime, self.clone());
        self.call()
    }

    fn call(&self) -> Value {
        self.inner.run_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(effect = ?self.id(), "running effect");
        self.inner
            .runtime
            .call(ErrorCode::EffectFunction, || (self.inner.func)())
            .unwrap_or_default()
    }

    /// Detach from every dependency and run `on_stop`. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut deps = self.inner.deps.lock();
            for (_, dep) in deps.drain(..) {
                dep.unsubscribe(self.id());
            }
        }
        let on_stop = self.inner.on_stop.lock().take();
        if let Some(on_stop) = on_stop {
            self.inner.runtime.call(ErrorCode::EffectStop, || on_stop());
        }
        tracing::debug!(effect = ?self.id(), "effect stopped");
    }

    /// Number of times the computation has been invoked.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Number of keys the effect is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }

    pub(crate) fn scheduler(&self) -> Option<SchedulerFn> {
        self.inner.scheduler.clone()
    }

    pub(crate) fn downgrade(&self) -> Weak<EffectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<EffectInner>) -> Option<Effect> {
        weak.upgrade().map(|inner| Effect { inner })
    }

    pub(crate) fn begin_tracking(&self) {
        let previous = self.inner.deps.lock().keys().copied().collect();
        *self.inner.frame.lock() = Some(TrackFrame {
            previous,
            tracked: IndexMap::new(),
        });
    }

    /// Note a read of `dep` in the current run. Returns true if the effect
    /// was not subscribed to it before this run.
    pub(crate) fn record_dep(&self, dep: &Dep) -> bool {
        let mut frame = self.inner.frame.lock();
        let Some(frame) = frame.as_mut() else {
            return false;
        };
        if frame.tracked.contains_key(&dep.id()) {
            return false;
        }
        frame.tracked.insert(dep.id(), dep.clone());
        !frame.previous.contains(&dep.id())
    }

    /// Drop subscriptions that were not read during the run just finished.
    pub(crate) fn finish_tracking(&self) {
        let Some(frame) = self.inner.frame.lock().take() else {
            return;
        };
        let mut deps = self.inner.deps.lock();
        for (id, dep) in deps.iter() {
            if !frame.tracked.contains_key(id) {
                dep.unsubscribe(self.id());
            }
        }
        *deps = frame.tracked;

        // Stopped mid-run: whatever was read after the stop must not stick.
        if !self.is_active() {
            for (_, dep) in deps.drain(..) {
                dep.unsubscribe(self.id());
            }
        }
    }

    pub(crate) fn notify_track(&self, info: &EventInfo) {
        if let Some(hook) = &self.inner.on_track {
            hook(&info.for_effect(self.id()));
        }
    }

    pub(crate) fn notify_trigger(&self, info: &EventInfo) {
        if let Some(hook) = &self.inner.on_trigger {
            hook(&info.for_effect(self.id()));
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Runtime {
    /// Create an effect that runs `f` now and again whenever what it read changes.
    pub fn effect<F, R>(&self, f: F) -> Effect
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        self.effect_with(f, EffectOptions::default())
    }

    pub fn effect_with<F, R>(&self, f: F, options: EffectOptions) -> Effect
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        let effect = Effect::new(self, f, &options);
        record_effect_scope(self, ScopeChild::Effect(effect.downgrade()), options.scope.as_ref());
        if !options.lazy {
            effect.run();
        }
        effect
    }
}

/// Stop an effect. Same as [`Effect::stop`].
pub fn stop(effect: &Effect) {
    effect.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
