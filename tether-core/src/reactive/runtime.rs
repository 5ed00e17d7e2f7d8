//! Reactive Runtime
//!
//! The runtime is the tracking context that connects containers, refs and
//! effects. It owns every piece of mutable engine state: the stack of
//! running effects, the tracking-enabled stack, the stack of active effect
//! scopes and the mutation gate.
//!
//! # How It Works
//!
//! 1. While an effect runs it sits on top of the effect stack.
//!
//! 2. A tracked read calls [`Runtime::track`], which subscribes the effect
//!    on top of the stack to the `Dep` of the key being read.
//!
//! 3. A write calls [`Runtime::trigger`], which:
//!    a. Selects the `Dep`s affected by the kind of write
//!    b. Merges their subscribers, keeping first-subscription order
//!    c. Hands each effect to its scheduler, or re-runs it directly
//!
//! # Domains
//!
//! Each `Runtime` is an independent reactive domain. Handles created from
//! one runtime keep a reference to it, so a test or a document can own its
//! own runtime without interference. A runtime is meant to be driven from
//! one thread at a time; the locks only guard against misuse, they do not
//! make interleaved propagation meaningful.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::effect::Effect;
use super::scope::EffectScope;
use super::subscriber::{DebugOp, DebugSource, EventInfo, SubscriberId};
use crate::config::{ErrorPolicy, RuntimeConfig};
use crate::error::{call_with_error_handling, ErrorCode};
use crate::graph::{CompositeKind, Dep, Target, TrackKey, TrackOp, TriggerOp, Value};
use crate::transaction::Gate;

/// Whether reads are currently recorded, plus the saved states to restore.
struct TrackingState {
    should_track: bool,
    stack: Vec<bool>,
}

pub(crate) struct RuntimeState {
    config: RuntimeConfig,
    effect_stack: Mutex<Vec<Effect>>,
    tracking: Mutex<TrackingState>,
    pub(crate) scope_stack: Mutex<Vec<EffectScope>>,
    pub(crate) gate: Mutex<Gate>,
}

/// One write, as seen by [`Runtime::trigger`].
#[derive(Debug, Clone)]
pub(crate) struct TriggerEvent {
    pub op: TriggerOp,
    pub key: Option<TrackKey>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

impl TriggerEvent {
    pub fn new(op: TriggerOp, key: TrackKey) -> Self {
        Self {
            op,
            key: Some(key),
            new_value: None,
            old_value: None,
        }
    }

    pub fn values(mut self, new_value: Option<Value>, old_value: Option<Value>) -> Self {
        self.new_value = new_value;
        self.old_value = old_value;
        self
    }

    fn info(&self, source: DebugSource) -> EventInfo {
        EventInfo {
            source,
            op: DebugOp::Trigger(self.op),
            key: self.key.clone(),
            new_value: self.new_value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}

/// Handle to a reactive domain. Cloning is cheap and shares the domain.
#[derive(Clone)]
pub struct Runtime(pub(crate) Arc<RuntimeState>);

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self(Arc::new(RuntimeState {
            config,
            effect_stack: Mutex::new(Vec::new()),
            tracking: Mutex::new(TrackingState {
                should_track: true,
                stack: Vec::new(),
            }),
            scope_stack: Mutex::new(Vec::new()),
            gate: Mutex::new(Gate::default()),
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn error_policy(&self) -> ErrorPolicy {
        self.0.config.error_policy
    }

    /// Run user code at a categorized call boundary.
    pub(crate) fn call<R>(&self, code: ErrorCode, f: impl FnOnce() -> R) -> Option<R> {
        call_with_error_handling(self.error_policy(), code, f)
    }

    // ------------------------------------------------------------------------
    // Tracking switches
    // ------------------------------------------------------------------------

    /// Stop recording reads until the matching [`Runtime::reset_tracking`].
    pub fn pause_tracking(&self) {
        let mut tracking = self.0.tracking.lock();
        let previous = tracking.should_track;
        tracking.stack.push(previous);
        tracking.should_track = false;
    }

    /// Record reads until the matching [`Runtime::reset_tracking`].
    pub fn enable_tracking(&self) {
        let mut tracking = self.0.tracking.lock();
        let previous = tracking.should_track;
        tracking.stack.push(previous);
        tracking.should_track = true;
    }

    /// Restore the state saved by the last pause or enable.
    pub fn reset_tracking(&self) {
        let mut tracking = self.0.tracking.lock();
        tracking.should_track = tracking.stack.pop().unwrap_or(true);
    }

    /// Run `f` without recording any reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _paused = super::context::TrackingPause::new(self);
        f()
    }

    /// Whether a read right now would subscribe an effect.
    pub fn is_tracking(&self) -> bool {
        self.0.tracking.lock().should_track && !self.0.effect_stack.lock().is_empty()
    }

    // ------------------------------------------------------------------------
    // Effect stack
    // ------------------------------------------------------------------------

    /// The effect currently running, if any.
    pub fn active_effect(&self) -> Option<Effect> {
        self.0.effect_stack.lock().last().cloned()
    }

    pub(crate) fn push_effect(&self, effect: Effect) {
        self.0.effect_stack.lock().push(effect);
    }

    pub(crate) fn pop_effect(&self) -> Option<Effect> {
        self.0.effect_stack.lock().pop()
    }

    /// Whether the effect is anywhere on the running stack.
    pub(crate) fn is_running(&self, id: SubscriberId) -> bool {
        self.0.effect_stack.lock().iter().any(|e| e.id() == id)
    }

    // ------------------------------------------------------------------------
    // Track
    // ------------------------------------------------------------------------

    /// Record that the running effect reads `key` of `target`.
    pub fn track(&self, target: &Target, op: TrackOp, key: TrackKey) {
        if !self.is_tracking() {
            return;
        }
        let dep = target.dep_or_insert(key.clone());
        self.track_dep(&dep, EventInfo::track(DebugSource::Target(target.id()), op, key));
    }

    pub(crate) fn track_dep(&self, dep: &Dep, info: EventInfo) {
        if !self.is_tracking() {
            return;
        }
        let Some(effect) = self.active_effect() else {
            return;
        };
        if effect.record_dep(dep) {
            dep.subscribe(&effect);
            effect.notify_track(&info);
        }
    }

    // ------------------------------------------------------------------------
    // Trigger
    // ------------------------------------------------------------------------

    /// Re-run or schedule every effect that read a key touched by this write.
    pub fn trigger(
        &self,
        target: &Target,
        op: TriggerOp,
        key: Option<TrackKey>,
        new_value: Option<Value>,
        old_value: Option<Value>,
    ) {
        self.trigger_batch(
            target,
            &[TriggerEvent {
                op,
                key,
                new_value,
                old_value,
            }],
        );
    }

    /// Trigger several writes to one container, running each effect once.
    pub(crate) fn trigger_batch(&self, target: &Target, events: &[TriggerEvent]) {
        if events.is_empty() || target.dep_count() == 0 {
            return;
        }
        let kind = target.kind();
        let source = DebugSource::Target(target.id());

        let mut effects: IndexMap<SubscriberId, (Effect, EventInfo)> = IndexMap::new();
        for event in events {
            for dep in affected_deps(target, kind, event) {
                for effect in dep.effects() {
                    effects
                        .entry(effect.id())
                        .or_insert_with(|| (effect, event.info(source)));
                }
            }
        }

        tracing::trace!(target_id = ?target.id(), count = effects.len(), "trigger");
        self.run_effects(effects.into_values());
    }

    pub(crate) fn trigger_dep(&self, dep: &Dep, info: EventInfo) {
        let effects = dep.effects().into_iter().map(|e| (e, info.clone()));
        self.run_effects(effects);
    }

    fn run_effects(&self, effects: impl IntoIterator<Item = (Effect, EventInfo)>) {
        let current = self.active_effect().map(|e| e.id());
        for (effect, info) in effects {
            if !effect.is_active() {
                continue;
            }
            if Some(effect.id()) == current && !effect.allows_recurse() {
                continue;
            }
            effect.notify_trigger(&info);
            match effect.scheduler() {
                Some(scheduler) => {
                    self.call(ErrorCode::Scheduler, || scheduler(&effect));
                }
                None => {
                    effect.run();
                }
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.0.config)
            .field("running", &self.0.effect_stack.lock().len())
            .finish()
    }
}

/// The `Dep`s a write wakes up.
fn affected_deps(target: &Target, kind: CompositeKind, event: &TriggerEvent) -> SmallVec<[Dep; 4]> {
    let mut deps: SmallVec<[Dep; 4]> = SmallVec::new();
    let is_array = kind == CompositeKind::Array;
    let is_map = kind == CompositeKind::Map;

    if event.op == TriggerOp::Clear {
        deps.extend(target.deps_where(|_| true));
        return deps;
    }

    if is_array && event.key == Some(TrackKey::Length) {
        let new_len = event
            .new_value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|n| n as usize)
            .unwrap_or(0);
        deps.extend(target.deps_where(|key| match key {
            TrackKey::Length => true,
            TrackKey::Index(i) => *i >= new_len,
            _ => false,
        }));
        return deps;
    }

    if let Some(key) = &event.key {
        deps.extend(target.dep(key));
    }

    match event.op {
        TriggerOp::Add | TriggerOp::Delete => {
            if !is_array {
                deps.extend(target.dep(&TrackKey::Iterate));
                if is_map {
                    deps.extend(target.dep(&TrackKey::MapKeyIterate));
                }
            } else if matches!(event.key, Some(TrackKey::Index(_))) {
                deps.extend(target.dep(&TrackKey::Length));
            }
        }
        TriggerOp::Set => {
            if is_map {
                deps.extend(target.dep(&TrackKey::Iterate));
            }
        }
        TriggerOp::Clear => {}
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting_effect(rt: &Runtime, target: &Target, key: TrackKey) -> (Effect, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let rt_clone = rt.clone();
        let target = target.clone();
        let effect = rt.effect(move || {
            rt_clone.track(&target, TrackOp::Get, key.clone());
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (effect, count)
    }

    #[test]
    fn track_outside_an_effect_is_a_no_op() {
        let rt = Runtime::new();
        let target = Target::object([("a", 1)]);
        rt.track(&target, TrackOp::Get, TrackKey::Prop("a".into()));
        assert_eq!(target.dep_count(), 0);
    }

    #[test]
    fn trigger_on_untracked_key_is_a_no_op() {
        let rt = Runtime::new();
        let target = Target::object([("a", 1)]);
        rt.trigger(&target, TriggerOp::Set, Some(TrackKey::Prop("a".into())), None, None);
    }

    #[test]
    fn add_wakes_iteration_subscribers() {
        let rt = Runtime::new();
        let target = Target::object([("a", 1)]);
        let (_effect, count) = counting_effect(&rt, &target, TrackKey::Iterate);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        rt.trigger(&target, TriggerOp::Set, Some(TrackKey::Prop("a".into())), None, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        rt.trigger(&target, TriggerOp::Add, Some(TrackKey::Prop("b".into())), None, None);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        rt.trigger(&target, TriggerOp::Delete, Some(TrackKey::Prop("b".into())), None, None);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn array_length_write_wakes_truncated_indices() {
        let rt = Runtime::new();
        let target = Target::array([1, 2, 3]);
        let (_low, low_count) = counting_effect(&rt, &target, TrackKey::Index(0));
        let (_high, high_count) = counting_effect(&rt, &target, TrackKey::Index(2));

        rt.trigger(
            &target,
            TriggerOp::Set,
            Some(TrackKey::Length),
            Some(Value::from(1)),
            Some(Value::from(3)),
        );
        assert_eq!(low_count.load(Ordering::SeqCst), 1);
        assert_eq!(high_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_wakes_every_key() {
        let rt = Runtime::new();
        let target = Target::map([("a", 1), ("b", 2)]);
        let (_a, a_count) = counting_effect(&rt, &target, TrackKey::Prop("a".into()));
        let (_b, b_count) = counting_effect(&rt, &target, TrackKey::Prop("b".into()));

        rt.trigger(&target, TriggerOp::Clear, None, None, None);
        assert_eq!(a_count.load(Ordering::SeqCst), 2);
        assert_eq!(b_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batched_events_run_each_effect_once() {
        let rt = Runtime::new();
        let target = Target::array([1, 2, 3]);
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let rt_clone = rt.clone();
        let tracked = target.clone();
        let _effect = rt.effect(move || {
            rt_clone.track(&tracked, TrackOp::Get, TrackKey::Index(0));
            rt_clone.track(&tracked, TrackOp::Get, TrackKey::Index(1));
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        rt.trigger_batch(
            &target,
            &[
                TriggerEvent::new(TriggerOp::Set, TrackKey::Index(0)),
                TriggerEvent::new(TriggerOp::Set, TrackKey::Index(1)),
            ],
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tracking_can_be_paused_and_restored() {
        let rt = Runtime::new();
        let target = Target::object([("a", 1)]);
        let rt_clone = rt.clone();
        let tracked = target.clone();
        let effect = rt.effect(move || {
            rt_clone.pause_tracking();
            rt_clone.track(&tracked, TrackOp::Get, TrackKey::Prop("a".into()));
            rt_clone.reset_tracking();
        });
        assert_eq!(effect.dependency_count(), 0);
        assert!(!rt.is_tracking());
    }
}
