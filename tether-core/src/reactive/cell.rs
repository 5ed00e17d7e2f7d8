//! Ref Cells
//!
//! A [`Ref`] is a single reactive slot. It is not backed by a container key:
//! every read of the value tracks the cell's own `Dep`, and every changing
//! write triggers it.
//!
//! # Forms
//!
//! - A plain cell, created with [`Runtime::create_ref`] or
//!   [`Runtime::shallow_ref`]. A non-shallow cell wraps container values on
//!   the way in, so mutations of the nested data are observable too.
//! - A property ref, created with [`to_ref`], which forwards to one key of a
//!   reactive container. [`to_refs`] makes one per key.
//! - A custom ref, created with [`Runtime::custom_ref`], where the caller
//!   decides when to track and when to trigger.
//!
//! [`proxy_refs`] goes the other way: it reads a container whose values may
//! be refs as if they were plain values.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::container::{to_raw, to_reactive, Reactive};
use super::runtime::Runtime;
use super::subscriber::{DebugOp, DebugSource, EventInfo};
use crate::error::{ReactiveError, Result};
use crate::graph::{has_changed, CompositeKind, Dep, PropKey, TrackKey, TrackOp, TriggerOp, Value};

struct CellState {
    raw: Value,
    value: Value,
}

type CustomGetter = Box<dyn Fn() -> Value + Send + Sync>;
type CustomSetter = Box<dyn Fn(Value) + Send + Sync>;

enum RefKind {
    Cell {
        dep: Dep,
        shallow: bool,
        state: Mutex<CellState>,
    },
    Property {
        object: Reactive,
        key: PropKey,
    },
    Custom {
        dep: Dep,
        get: CustomGetter,
        set: CustomSetter,
    },
}

struct RefInner {
    runtime: Runtime,
    kind: RefKind,
}

/// A single reactive value. Cloning shares the same cell.
///
/// # Example
///
/// ```rust
/// use tether_core::{Runtime, Value};
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(0);
/// assert_eq!(count.get(), Value::from(0));
///
/// count.update(|v| Value::from(v.as_f64().unwrap_or(0.0) + 1.0));
/// assert_eq!(count.get(), Value::from(1));
/// ```
#[derive(Clone)]
pub struct Ref(Arc<RefInner>);

impl Ref {
    fn cell(runtime: &Runtime, value: Value, shallow: bool) -> Self {
        let (raw, value) = if shallow {
            (value.clone(), value)
        } else {
            let raw = to_raw(&value);
            (raw.clone(), to_reactive(runtime, raw))
        };
        Self(Arc::new(RefInner {
            runtime: runtime.clone(),
            kind: RefKind::Cell {
                dep: Dep::new(),
                shallow,
                state: Mutex::new(CellState { raw, value }),
            },
        }))
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> Value {
        match &self.0.kind {
            RefKind::Cell { dep, state, .. } => {
                self.track(dep);
                state.lock().value.clone()
            }
            RefKind::Property { object, key } => object.get(key.clone()).unwrap_or_default(),
            RefKind::Custom { get, .. } => get(),
        }
    }

    /// Read the value without subscribing anything.
    pub fn get_untracked(&self) -> Value {
        self.0.runtime.untracked(|| self.get())
    }

    /// Write the value. Subscribers run only if the value actually changed.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        match &self.0.kind {
            RefKind::Cell {
                dep,
                shallow,
                state,
            } => {
                let new_raw = if *shallow { value.clone() } else { to_raw(&value) };
                let old = {
                    let mut state = state.lock();
                    if !has_changed(&new_raw, &state.raw) {
                        return;
                    }
                    let old = std::mem::replace(&mut state.raw, new_raw.clone());
                    state.value = if *shallow {
                        value
                    } else {
                        to_reactive(&self.0.runtime, new_raw.clone())
                    };
                    old
                };
                self.trigger(dep, Some(new_raw), Some(old));
            }
            RefKind::Property { object, key } => {
                if let Err(err) = object.set(key.clone(), value) {
                    tracing::warn!(%err, "write through property ref failed");
                }
            }
            RefKind::Custom { set, .. } => set(value),
        }
    }

    /// Replace the value with `f(current)`. The read is not tracked.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let current = self.get_untracked();
        self.set(f(&current));
    }

    pub fn is_shallow(&self) -> bool {
        matches!(&self.0.kind, RefKind::Cell { shallow: true, .. })
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        match &self.0.kind {
            RefKind::Cell { dep, .. } | RefKind::Custom { dep, .. } => dep.subscriber_count(),
            RefKind::Property { object, key } => object
                .raw()
                .dep(&object.track_key(key))
                .map_or(0, |dep| dep.subscriber_count()),
        }
    }

    fn track(&self, dep: &Dep) {
        self.0.runtime.track_dep(
            dep,
            EventInfo::track(DebugSource::Ref(dep.id()), TrackOp::Get, TrackKey::Value),
        );
    }

    fn trigger(&self, dep: &Dep, new_value: Option<Value>, old_value: Option<Value>) {
        tracing::trace!(dep = ?dep.id(), "trigger ref");
        self.0.runtime.trigger_dep(
            dep,
            EventInfo {
                source: DebugSource::Ref(dep.id()),
                op: DebugOp::Trigger(TriggerOp::Set),
                key: Some(TrackKey::Value),
                new_value,
                old_value,
            },
        );
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0.kind {
            RefKind::Cell { shallow: false, .. } => "cell",
            RefKind::Cell { shallow: true, .. } => "shallow",
            RefKind::Property { .. } => "property",
            RefKind::Custom { .. } => "custom",
        };
        f.debug_struct("Ref")
            .field("kind", &kind)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// The `track`/`trigger` pair handed to a [`Runtime::custom_ref`] factory.
#[derive(Clone)]
pub struct RefTracker {
    runtime: Runtime,
    dep: Dep,
}

impl RefTracker {
    pub fn track(&self) {
        self.runtime.track_dep(
            &self.dep,
            EventInfo::track(DebugSource::Ref(self.dep.id()), TrackOp::Get, TrackKey::Value),
        );
    }

    pub fn trigger(&self) {
        self.runtime.trigger_dep(
            &self.dep,
            EventInfo {
                source: DebugSource::Ref(self.dep.id()),
                op: DebugOp::Trigger(TriggerOp::Set),
                key: Some(TrackKey::Value),
                new_value: None,
                old_value: None,
            },
        );
    }
}

impl Runtime {
    /// Create a ref. Containers are wrapped so nested writes are observable.
    /// Passing a ref returns that same ref.
    pub fn create_ref(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(existing) => existing,
            value => Ref::cell(self, value, false),
        }
    }

    /// Create a ref that stores its value as given, without wrapping.
    pub fn shallow_ref(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(existing) => existing,
            value => Ref::cell(self, value, true),
        }
    }

    /// Create a ref whose reads and writes are implemented by the caller.
    ///
    /// The factory receives a [`RefTracker`] and returns the getter and
    /// setter. The getter should call `track()`, the setter `trigger()`.
    pub fn custom_ref<G, S>(&self, factory: impl FnOnce(RefTracker) -> (G, S)) -> Ref
    where
        G: Fn() -> Value + Send + Sync + 'static,
        S: Fn(Value) + Send + Sync + 'static,
    {
        let dep = Dep::new();
        let (get, set) = factory(RefTracker {
            runtime: self.clone(),
            dep: dep.clone(),
        });
        Ref(Arc::new(RefInner {
            runtime: self.clone(),
            kind: RefKind::Custom {
                dep,
                get: Box::new(get),
                set: Box::new(set),
            },
        }))
    }
}

/// A ref that reads and writes `key` of `object`.
pub fn to_ref(object: &Reactive, key: impl Into<PropKey>) -> Result<Ref> {
    let key = key.into();
    object.check_key(&key)?;
    Ok(Ref(Arc::new(RefInner {
        runtime: object.runtime().clone(),
        kind: RefKind::Property {
            object: object.clone(),
            key,
        },
    })))
}

/// A property ref for every key of `object`, in key order.
///
/// Reading the key list is tracked like [`Reactive::keys`]. Sets have no
/// per-key values and are rejected.
pub fn to_refs(object: &Reactive) -> Result<Vec<(PropKey, Ref)>> {
    let kind = object.kind();
    if kind == CompositeKind::Set {
        return Err(ReactiveError::KindMismatch {
            expected: "object, array or map",
            found: kind,
        });
    }
    object
        .prop_keys()
        .into_iter()
        .map(|key| to_ref(object, key.clone()).map(|r| (key, r)))
        .collect()
}

/// A view of a container that unwraps the refs stored in it.
///
/// Reads return the ref's value instead of the ref. Writing a plain value
/// over a stored ref writes into the ref; anything else goes to the
/// container and is subject to the mutation gate.
#[derive(Clone, Debug)]
pub struct ProxyRefs(Reactive);

impl ProxyRefs {
    pub fn get(&self, key: impl Into<PropKey>) -> Result<Value> {
        Ok(unref(&self.0.get(key)?))
    }

    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.0.check_key(&key)?;
        if let Some(Value::Ref(current)) = self.0.raw().get_raw(&key) {
            if !is_ref(&value) {
                current.set(value);
                return Ok(());
            }
        }
        self.0.set(key, value)
    }

    pub fn has(&self, key: impl Into<PropKey>) -> Result<bool> {
        self.0.has(key)
    }

    /// The container this view reads.
    pub fn inner(&self) -> &Reactive {
        &self.0
    }
}

pub fn proxy_refs(object: &Reactive) -> ProxyRefs {
    ProxyRefs(object.clone())
}

/// Notify the subscribers of a ref without changing it.
pub fn trigger_ref(r: &Ref) {
    match &r.0.kind {
        RefKind::Cell { dep, state, .. } => {
            let value = state.lock().raw.clone();
            r.trigger(dep, Some(value), None);
        }
        RefKind::Custom { dep, .. } => r.trigger(dep, None, None),
        RefKind::Property { .. } => {}
    }
}

pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The value of a ref (tracked), or the value itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}
