//! Watchers
//!
//! A watcher is an effect whose scheduler compares the new value of a
//! source with the previous one and calls a callback when it changed.
//!
//! # Sources
//!
//! A [`WatchSource`] is resolved once, when the watcher is created:
//!
//! - a ref is read through [`Ref::get`]; a shallow ref always fires
//! - a reactive container is traversed deeply and always fires
//! - a getter is called as-is
//! - a list of the above produces an array of values compared slot by slot
//!
//! # Cleanup
//!
//! The callback receives an [`Invalidator`]. A cleanup registered there runs
//! once, before the next callback or when the watcher stops.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::cell::Ref;
use super::container::Reactive;
use super::effect::{Effect, EffectOptions, SchedulerFn};
use super::runtime::Runtime;
use super::subscriber::{DebuggerEvent, DebuggerHook};
use crate::error::ErrorCode;
use crate::graph::{has_changed, Composite, Target, TargetId, Value};

type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    Ref(Ref),
    Reactive(Reactive),
    Getter(Getter),
    Many(Vec<WatchSource>),
}

impl WatchSource {
    pub fn getter<F, R>(f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        WatchSource::Getter(Arc::new(move || f().into()))
    }

    pub fn many(sources: impl IntoIterator<Item = WatchSource>) -> Self {
        WatchSource::Many(sources.into_iter().collect())
    }
}

impl From<Ref> for WatchSource {
    fn from(r: Ref) -> Self {
        WatchSource::Ref(r)
    }
}

impl From<Reactive> for WatchSource {
    fn from(r: Reactive) -> Self {
        WatchSource::Reactive(r)
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(sources: Vec<WatchSource>) -> Self {
        WatchSource::Many(sources)
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchSource::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            WatchSource::Reactive(r) => f.debug_tuple("Reactive").field(r).finish(),
            WatchSource::Getter(_) => f.write_str("Getter(..)"),
            WatchSource::Many(sources) => f.debug_tuple("Many").field(sources).finish(),
        }
    }
}

#[derive(Clone, Default)]
pub struct WatchOptions {
    /// Call the callback once at creation, with no previous value.
    pub immediate: bool,
    /// Traverse the source value and fire on any nested change.
    pub deep: bool,
    pub on_track: Option<DebuggerHook>,
    pub on_trigger: Option<DebuggerHook>,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
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

type Cleanup = Box<dyn FnOnce() + Send>;

/// Registers the cleanup for the current callback run.
#[derive(Clone)]
pub struct Invalidator {
    runtime: Runtime,
    slot: Arc<Mutex<Option<Cleanup>>>,
}

impl Invalidator {
    fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` before the next callback, or when the watcher stops.
    /// Replaces any cleanup registered earlier.
    pub fn on_invalidate(&self, f: impl FnOnce() + Send + 'static) {
        *self.slot.lock() = Some(Box::new(f));
    }

    fn run_cleanup(&self) {
        let cleanup = self.slot.lock().take();
        if let Some(cleanup) = cleanup {
            self.runtime.call(ErrorCode::WatchCleanup, cleanup);
        }
    }
}

/// Keeps a watcher alive. Dropping the handle ends the watcher without
/// running its pending cleanup; [`WatchHandle::stop`] runs it.
#[must_use = "dropping the handle detaches the effect"]
pub struct WatchHandle {
    effect: Effect,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// The underlying effect.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").field("effect", &self.effect).finish()
    }
}

/// The source reduced to one getter, plus how its values are compared.
struct Resolved {
    getter: Getter,
    deep: bool,
    force_trigger: bool,
    multi: bool,
}

fn resolve(runtime: &Runtime, source: WatchSource, deep: bool) -> Resolved {
    match source {
        WatchSource::Ref(r) => Resolved {
            force_trigger: r.is_shallow(),
            getter: Arc::new(move || r.get()),
            deep,
            multi: false,
        },
        WatchSource::Reactive(r) => Resolved {
            getter: Arc::new(move || Value::Reactive(r.clone())),
            deep: true,
            force_trigger: false,
            multi: false,
        },
        WatchSource::Getter(g) => {
            let rt = runtime.clone();
            Resolved {
                getter: Arc::new(move || rt.call(ErrorCode::WatchGetter, || g()).unwrap_or_default()),
                deep,
                force_trigger: false,
                multi: false,
            }
        }
        WatchSource::Many(sources) => {
            let rt = runtime.clone();
            Resolved {
                force_trigger: sources.iter().any(|s| matches!(s, WatchSource::Reactive(_))),
                getter: Arc::new(move || {
                    Value::array(sources.iter().map(|source| match source {
                        WatchSource::Ref(r) => r.get(),
                        WatchSource::Reactive(r) => traverse(Value::Reactive(r.clone())),
                        WatchSource::Getter(g) => {
                            rt.call(ErrorCode::WatchGetter, || g()).unwrap_or_default()
                        }
                        WatchSource::Many(_) => {
                            tracing::warn!(
                                "invalid watch source: a nested list of sources is not supported"
                            );
                            Value::Null
                        }
                    }))
                }),
                deep,
                multi: true,
            }
        }
    }
}

impl Runtime {
    /// Call `callback(new, old, invalidator)` whenever `source` changes.
    ///
    /// `old` is `None` on the first call if that call is the immediate one.
    pub fn watch<F>(&self, source: impl Into<WatchSource>, callback: F, options: WatchOptions) -> WatchHandle
    where
        F: Fn(&Value, Option<&Value>, &Invalidator) + Send + Sync + 'static,
    {
        let resolved = resolve(self, source.into(), options.deep);
        let getter: Getter = if resolved.deep {
            let base = resolved.getter;
            Arc::new(move || traverse(base()))
        } else {
            resolved.getter
        };

        let invalidator = Invalidator::new(self);
        let old_value: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let (deep, force_trigger, multi) = (resolved.deep, resolved.force_trigger, resolved.multi);

        let job: SchedulerFn = {
            let rt = self.clone();
            let invalidator = invalidator.clone();
            let old_value = old_value.clone();
            Arc::new(move |effect: &Effect| {
                if !effect.is_active() {
                    return;
                }
                let new_value = effect.run();
                let previous = old_value.lock().clone();
                let changed = deep
                    || force_trigger
                    || match &previous {
                        None => true,
                        Some(old) if multi => slots_changed(&new_value, old),
                        Some(old) => has_changed(&new_value, old),
                    };
                if changed {
                    invalidator.run_cleanup();
                    rt.call(ErrorCode::WatchCallback, || {
                        callback(&new_value, previous.as_ref(), &invalidator)
                    });
                    *old_value.lock() = Some(new_value);
                }
            })
        };

        let on_stop = {
            let invalidator = invalidator.clone();
            move || invalidator.run_cleanup()
        };
        let effect = self.effect_with(
            move || getter(),
            EffectOptions {
                lazy: true,
                scheduler: Some(job.clone()),
                allow_recurse: true,
                on_track: options.on_track,
                on_trigger: options.on_trigger,
                ..EffectOptions::default()
            }
            .on_stop(on_stop),
        );

        if options.immediate {
            job(&effect);
        } else {
            *old_value.lock() = Some(effect.run());
        }
        WatchHandle { effect }
    }

    /// Run `f` now and again whenever what it read changes. The cleanup
    /// registered through the [`Invalidator`] runs before each re-run.
    pub fn watch_effect<F>(&self, f: F, options: WatchOptions) -> WatchHandle
    where
        F: Fn(&Invalidator) + Send + Sync + 'static,
    {
        if options.immediate {
            tracing::warn!("watch_effect() ignores the `immediate` option");
        }
        if options.deep {
            tracing::warn!("watch_effect() ignores the `deep` option");
        }

        let invalidator = Invalidator::new(self);
        let getter = {
            let rt = self.clone();
            let invalidator = invalidator.clone();
            move || {
                invalidator.run_cleanup();
                rt.call(ErrorCode::WatchCallback, || f(&invalidator));
            }
        };
        let on_stop = move || invalidator.run_cleanup();

        let effect = self.effect_with(
            getter,
            EffectOptions {
                on_track: options.on_track,
                on_trigger: options.on_trigger,
                ..EffectOptions::default()
            }
            .on_stop(on_stop),
        );
        WatchHandle { effect }
    }
}

fn array_items(value: &Value) -> Vec<Value> {
    value
        .as_target()
        .map(|t| {
            t.read(|data| match data {
                Composite::Array(items) => items.clone(),
                _ => Vec::new(),
            })
        })
        .unwrap_or_default()
}

fn slots_changed(new: &Value, old: &Value) -> bool {
    let old = array_items(old);
    array_items(new)
        .iter()
        .enumerate()
        .any(|(i, value)| old.get(i).map_or(true, |previous| has_changed(value, previous)))
}

/// Read every value reachable from `value`, tracking each reactive read.
/// Returns `value` unchanged.
pub fn traverse(value: Value) -> Value {
    let mut seen = Seen::default();
    visit(&value, &mut seen);
    value
}

#[derive(Default)]
struct Seen {
    targets: HashSet<TargetId>,
    refs: Vec<Ref>,
}

fn visit(value: &Value, seen: &mut Seen) {
    match value {
        Value::Reactive(r) => {
            if seen.targets.insert(r.raw().id()) {
                for nested in r.values() {
                    visit(&nested, seen);
                }
            }
        }
        Value::Target(t) => {
            if seen.targets.insert(t.id()) {
                for nested in raw_children(t) {
                    visit(&nested, seen);
                }
            }
        }
        Value::Ref(r) => {
            if !seen.refs.iter().any(|s| s.ptr_eq(r)) {
                seen.refs.push(r.clone());
                visit(&r.get(), seen);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

fn raw_children(target: &Target) -> Vec<Value> {
    target.read(|data| match data {
        Composite::Object(fields) => fields.values().cloned().collect(),
        Composite::Array(items) => items.clone(),
        Composite::Map(entries) => entries.values().cloned().collect(),
        Composite::Set(_) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorPolicy, RuntimeConfig};
    use std::sync::atomic::{AtomicI32, Ordering};

    type Calls = Arc<Mutex<Vec<(Value, Option<Value>)>>>;

    fn recorder() -> (Calls, impl Fn(&Value, Option<&Value>, &Invalidator) + Send + Sync + 'static) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        (calls, move |new: &Value, old: Option<&Value>, _: &Invalidator| {
            calls_clone.lock().push((new.clone(), old.cloned()));
        })
    }

    #[test]
    fn callback_waits_for_a_change() {
        let rt = Runtime::new();
        let count = rt.create_ref(1);
        let (calls, cb) = recorder();
        let _watch = rt.watch(count.clone(), cb, WatchOptions::new());
        assert!(calls.lock().is_empty());

        count.set(1);
        assert!(calls.lock().is_empty());

        count.set(2);
        count.set(3);
        assert_eq!(
            *calls.lock(),
            vec![
                (Value::from(2), Some(Value::from(1))),
                (Value::from(3), Some(Value::from(2))),
            ]
        );
    }

    #[test]
    fn immediate_has_no_previous_value() {
        let rt = Runtime::new();
        let count = rt.create_ref(1);
        let (calls, cb) = recorder();
        let _watch = rt.watch(count.clone(), cb, WatchOptions::new().immediate());

        count.set(2);
        assert_eq!(
            *calls.lock(),
            vec![(Value::from(1), None), (Value::from(2), Some(Value::from(1)))]
        );
    }

    #[test]
    fn getter_sources_compare_values() {
        let rt = Runtime::new();
        let count = rt.create_ref(1);
        let c = count.clone();
        let (calls, cb) = recorder();
        let _watch = rt.watch(
            WatchSource::getter(move || c.get().as_f64().unwrap_or(0.0) > 5.0),
            cb,
            WatchOptions::new(),
        );

        count.set(2);
        assert!(calls.lock().is_empty());
        count.set(6);
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn reactive_sources_are_deep() {
        let rt = Runtime::new();
        let state = rt
            .reactive(Value::from(serde_json::json!({"nested": {"n": 1}})))
            .unwrap();
        let (calls, cb) = recorder();
        let _watch = rt.watch(state.clone(), cb, WatchOptions::new());

        rt.transaction(|| {
            let nested = state.get("nested").unwrap();
            nested.as_reactive().unwrap().set("n", 2).unwrap();
        });
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn multiple_sources_compare_per_slot() {
        let rt = Runtime::new();
        let a = rt.create_ref(1);
        let b = rt.create_ref("x");
        let (calls, cb) = recorder();
        let _watch = rt.watch(
            WatchSource::many([a.clone().into(), b.clone().into()]),
            cb,
            WatchOptions::new(),
        );

        b.set("y");
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        let (new, old) = &calls[0];
        assert_eq!(array_items(new), vec![Value::from(1), Value::from("y")]);
        assert_eq!(
            array_items(old.as_ref().unwrap()),
            vec![Value::from(1), Value::from("x")]
        );
    }

    #[test]
    fn cleanup_runs_before_next_callback_and_on_stop() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let cleanups = Arc::new(AtomicI32::new(0));
        let cleanups_clone = cleanups.clone();
        let watch = rt.watch(
            count.clone(),
            move |_, _, invalidator| {
                let cleanups = cleanups_clone.clone();
                invalidator.on_invalidate(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
            },
            WatchOptions::new(),
        );

        count.set(1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        count.set(2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        watch.stop();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        assert!(!watch.is_active());

        count.set(3);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callback_may_write_back_into_its_source() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let c = count.clone();
        let _watch = rt.watch(
            count.clone(),
            move |new, _, _| {
                if new.as_f64().is_some_and(|n| n < 3.0) {
                    c.set(new.as_f64().unwrap_or(0.0) + 1.0);
                }
            },
            WatchOptions::new(),
        );

        count.set(1);
        assert_eq!(count.get_untracked(), Value::from(3));
    }

    #[test]
    fn watch_effect_reruns_and_cleans_up() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let runs = Arc::new(AtomicI32::new(0));
        let cleanups = Arc::new(AtomicI32::new(0));

        let c = count.clone();
        let runs_clone = runs.clone();
        let cleanups_clone = cleanups.clone();
        let watch = rt.watch_effect(
            move |invalidator| {
                c.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
                let cleanups = cleanups_clone.clone();
                invalidator.on_invalidate(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
            },
            WatchOptions::new(),
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        watch.stop();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_callback_is_contained_under_log_policy() {
        let rt = Runtime::with_config(RuntimeConfig::default().with_error_policy(ErrorPolicy::Log));
        let count = rt.create_ref(0);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let _watch = rt.watch(
            count.clone(),
            move |_, _, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                panic!("callback failed");
            },
            WatchOptions::new(),
        );

        count.set(1);
        count.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn traverse_survives_cycles() {
        let rt = Runtime::new();
        let node = Target::object([("name", "loop")]);
        node.insert_raw("next", Value::Target(node.clone()));
        let wrapped = rt.wrap(&node);

        let w = wrapped.clone();
        let effect = rt.effect(move || traverse(Value::Reactive(w.clone())));
        // Iterate plus both fields.
        assert_eq!(effect.dependency_count(), 3);
    }
}
