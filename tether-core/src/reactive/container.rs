//! Reactive Containers
//!
//! A [`Reactive`] stands in front of a [`Target`] and routes every read to
//! [`Runtime::track`] and every accepted write to [`Runtime::trigger`].
//!
//! # Reads
//!
//! Reads track the key they touch. Enumeration tracks the container's
//! iteration key instead (`Length` for arrays, `MapKeyIterate` for map
//! keys, `Iterate` otherwise), so structural growth re-runs enumerating
//! effects. Nested containers are wrapped lazily, on the way out.
//!
//! # Writes
//!
//! Writes consult the mutation gate first. Outside a transaction they leave
//! the data untouched, trigger nothing and still return `Ok`. Array
//! mutations are applied in one step and delivered as a single trigger
//! batch, so an effect that reads several affected slots runs once.

use std::fmt;
use std::sync::{Arc, Weak};

use super::runtime::{Runtime, TriggerEvent};
use crate::error::{ReactiveError, Result};
use crate::graph::{
    has_changed, same_value_zero, strict_equals, Composite, CompositeKind, PropKey, Target,
    TrackKey, TrackOp, TriggerOp, Value,
};
use crate::transaction::{record_mutation, EditingMode, PatchOp};

/// Longest array [`Reactive::set_len`] will pad to.
pub const MAX_ARRAY_LEN: usize = u32::MAX as usize;

pub struct ReactiveInner {
    target: Target,
    runtime: Runtime,
}

/// A tracked handle to a container.
///
/// # Example
///
/// ```rust
/// use tether_core::{Runtime, Target, Value};
///
/// let rt = Runtime::new();
/// let state = rt.wrap(&Target::object([("count", 0)]));
///
/// let s = state.clone();
/// let _effect = rt.effect(move || {
///     println!("count = {:?}", s.get("count"));
/// });
///
/// rt.transaction(|| state.set("count", 1)).unwrap();
/// assert_eq!(state.get("count").unwrap(), Value::from(1));
/// ```
#[derive(Clone)]
pub struct Reactive(Arc<ReactiveInner>);

/// One slot of an array mutation.
struct ArrayChange {
    op: PatchOp,
    index: usize,
    new_value: Option<Value>,
    old_value: Option<Value>,
}

impl Reactive {
    /// The wrapped container.
    pub fn raw(&self) -> Target {
        self.0.target.clone()
    }

    pub fn kind(&self) -> CompositeKind {
        self.0.target.kind()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Deep, untracked snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Target(self.raw()).to_json()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read an object field, array slot or map entry. Missing keys read as `Null`.
    pub fn get(&self, key: impl Into<PropKey>) -> Result<Value> {
        let kind = self.kind();
        if kind == CompositeKind::Set {
            return Err(ReactiveError::KindMismatch {
                expected: "object, array or map",
                found: kind,
            });
        }
        let key = normalize_key(kind, key.into())?;
        let value = self.0.target.get_raw(&key).unwrap_or_default();
        self.track(TrackOp::Get, key_for(kind, &key));
        Ok(self.reveal(&key, value))
    }

    /// Whether the key or set member exists.
    pub fn has(&self, key: impl Into<PropKey>) -> Result<bool> {
        let kind = self.kind();
        let key = normalize_key(kind, key.into())?;
        self.track(TrackOp::Has, key_for(kind, &key));
        Ok(self.0.target.read(|data| match data {
            Composite::Object(fields) => fields.contains_key(&*key.to_field()),
            Composite::Array(items) => key.as_index().is_some_and(|i| i < items.len()),
            Composite::Map(entries) => entries.contains_key(&key),
            Composite::Set(members) => members.contains(&key),
        }))
    }

    /// Number of fields, slots, entries or members.
    pub fn len(&self) -> usize {
        self.track_iteration(false);
        self.0.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names, indices, map keys or set members, in order.
    pub fn keys(&self) -> Vec<Value> {
        self.track_iteration(true);
        self.0.target.read(|data| match data {
            Composite::Object(fields) => fields.keys().map(|k| Value::String(Arc::clone(k))).collect(),
            Composite::Array(items) => (0..items.len()).map(Value::from).collect(),
            Composite::Map(entries) => entries.keys().cloned().map(Value::from).collect(),
            Composite::Set(members) => members.iter().cloned().map(Value::from).collect(),
        })
    }

    /// [`Reactive::keys`] as property keys.
    pub(crate) fn prop_keys(&self) -> Vec<PropKey> {
        self.track_iteration(true);
        self.0.target.read(|data| match data {
            Composite::Object(fields) => fields.keys().map(|k| PropKey::Str(Arc::clone(k))).collect(),
            Composite::Array(items) => (0..items.len()).map(PropKey::from).collect(),
            Composite::Map(entries) => entries.keys().cloned().collect(),
            Composite::Set(members) => members.iter().cloned().collect(),
        })
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// `(key, value)` pairs in order. Set entries pair each member with itself.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.track_iteration(false);
        let kind = self.kind();
        let raw: Vec<(PropKey, Value)> = self.0.target.read(|data| match data {
            Composite::Object(fields) => fields
                .iter()
                .map(|(k, v)| (PropKey::Str(Arc::clone(k)), v.clone()))
                .collect(),
            Composite::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (PropKey::from(i), v.clone()))
                .collect(),
            Composite::Map(entries) => entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Composite::Set(members) => members
                .iter()
                .map(|k| (k.clone(), Value::from(k.clone())))
                .collect(),
        });

        raw.into_iter()
            .map(|(key, value)| {
                // Objects and arrays report per-key reads, as if each value was got.
                if matches!(kind, CompositeKind::Object | CompositeKind::Array) {
                    self.track(TrackOp::Get, key_for(kind, &key));
                }
                let value = self.reveal(&key, value);
                (Value::from(key), value)
            })
            .collect()
    }

    pub fn includes(&self, needle: &Value) -> Result<bool> {
        Ok(self
            .search(needle, |items, n| items.iter().position(|v| same_value_zero(v, n)))?
            .is_some())
    }

    pub fn index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.search(needle, |items, n| items.iter().position(|v| strict_equals(v, n)))
    }

    pub fn last_index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.search(needle, |items, n| items.iter().rposition(|v| strict_equals(v, n)))
    }

    /// Identity-sensitive search. Tries the needle as given, then unwrapped,
    /// so a wrapper finds the raw element stored in the array.
    fn search(
        &self,
        needle: &Value,
        find: impl Fn(&[Value], &Value) -> Option<usize>,
    ) -> Result<Option<usize>> {
        let len = self.expect_array()?;
        self.track(TrackOp::Get, TrackKey::Length);
        for i in 0..len {
            self.track(TrackOp::Get, TrackKey::Index(i));
        }
        let raw_needle = to_raw(needle);
        Ok(self.0.target.read(|data| match data {
            Composite::Array(items) => find(items, needle).or_else(|| find(items, &raw_needle)),
            _ => None,
        }))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write an object field, array slot or map entry.
    ///
    /// An array accepts indexes up to its length; writing at the length
    /// appends. Anything further out is an `InvalidKey` error.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let kind = self.kind();
        let key = normalize_key(kind, key.into())?;
        let value = to_raw(&value.into());

        match kind {
            CompositeKind::Set => Err(ReactiveError::KindMismatch {
                expected: "object, array or map",
                found: kind,
            }),
            CompositeKind::Array => {
                let len = self.expect_array()?;
                if !self.writable("set", Some(&key)) {
                    return Ok(());
                }
                let index = key.as_index().unwrap_or_default();
                if index > len {
                    return Err(ReactiveError::InvalidKey { key, kind });
                }
                self.mutate_array("set", move |items| match items.get_mut(index) {
                    Some(slot) => *slot = value,
                    None => items.push(value),
                })
            }
            CompositeKind::Object | CompositeKind::Map => {
                if !self.writable("set", Some(&key)) {
                    return Ok(());
                }
                let stored = value.clone();
                let old = self.0.target.write(|data| match data {
                    Composite::Object(fields) => fields.insert(key.to_field(), stored),
                    Composite::Map(entries) => entries.insert(key.clone(), stored),
                    Composite::Array(_) | Composite::Set(_) => None,
                });
                match old {
                    None => self.commit(TriggerOp::Add, kind, &key, Some(value), None),
                    Some(old) if has_changed(&value, &old) => {
                        self.commit(TriggerOp::Set, kind, &key, Some(value), Some(old))
                    }
                    Some(_) => {}
                }
                Ok(())
            }
        }
    }

    /// Remove an object field, map entry or set member. Returns whether it existed.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        let kind = self.kind();
        if kind == CompositeKind::Array {
            return Err(ReactiveError::KindMismatch {
                expected: "object, map or set",
                found: kind,
            });
        }
        let key = normalize_key(kind, key.into())?;
        if !self.writable("delete", Some(&key)) {
            return Ok(false);
        }
        let old = self.0.target.write(|data| match data {
            Composite::Object(fields) => fields.shift_remove(&*key.to_field()),
            Composite::Map(entries) => entries.shift_remove(&key),
            Composite::Set(members) => members.shift_remove(&key).then(|| Value::from(key.clone())),
            Composite::Array(_) => None,
        });
        match old {
            Some(old) => {
                self.commit(TriggerOp::Delete, kind, &key, None, Some(old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Insert a set member. Returns whether it was new.
    pub fn add(&self, member: impl Into<PropKey>) -> Result<bool> {
        let kind = self.kind();
        if kind != CompositeKind::Set {
            return Err(ReactiveError::KindMismatch {
                expected: "set",
                found: kind,
            });
        }
        let member = member.into();
        if !self.writable("add", Some(&member)) {
            return Ok(false);
        }
        let added = self.0.target.write(|data| match data {
            Composite::Set(members) => members.insert(member.clone()),
            _ => false,
        });
        if added {
            let value = Value::from(member.clone());
            self.commit(TriggerOp::Add, kind, &member, Some(value), None);
        }
        Ok(added)
    }

    /// Remove everything.
    pub fn clear(&self) -> Result<()> {
        let kind = self.kind();
        if kind == CompositeKind::Array {
            return self.set_len(0);
        }
        if !self.writable("clear", None) {
            return Ok(());
        }
        let removed: Vec<(PropKey, Value)> = self.0.target.write(|data| match data {
            Composite::Object(fields) => fields
                .drain(..)
                .map(|(k, v)| (PropKey::Str(k), v))
                .collect(),
            Composite::Map(entries) => entries.drain(..).collect(),
            Composite::Set(members) => members
                .drain(..)
                .map(|k| (k.clone(), Value::from(k)))
                .collect(),
            Composite::Array(_) => Vec::new(),
        });
        if removed.is_empty() {
            return Ok(());
        }
        // Undo replays patches backwards, so record last-to-first.
        for (key, old) in removed.iter().rev() {
            record_mutation(&self.0.runtime, &self.0.target, PatchOp::Remove, key, None, Some(old));
        }
        self.0.runtime.trigger(&self.0.target, TriggerOp::Clear, None, None, None);
        Ok(())
    }

    /// Append to an array. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = to_raw(&value.into());
        self.mutate_array("push", |items| {
            items.push(value);
            items.len()
        })
    }

    /// Remove and return the last element, or `Null` if the array is empty.
    pub fn pop(&self) -> Result<Value> {
        let popped = self.mutate_array("pop", Vec::pop)?;
        Ok(self.wrap_value(popped.unwrap_or_default()))
    }

    /// Remove and return the first element, or `Null` if the array is empty.
    pub fn shift(&self) -> Result<Value> {
        let shifted = self.mutate_array("shift", |items| {
            (!items.is_empty()).then(|| items.remove(0))
        })?;
        Ok(self.wrap_value(shifted.unwrap_or_default()))
    }

    /// Prepend to an array. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        let value = to_raw(&value.into());
        self.mutate_array("unshift", |items| {
            items.insert(0, value);
            items.len()
        })
    }

    /// Remove `delete_count` elements from `start`, insert `items` in their
    /// place and return the removed elements. Out-of-range bounds are clamped.
    pub fn splice<V, I>(&self, start: usize, delete_count: usize, items: I) -> Result<Vec<Value>>
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let inserted: Vec<Value> = items.into_iter().map(|v| to_raw(&v.into())).collect();
        let removed = self.mutate_array("splice", |items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, inserted).collect::<Vec<_>>()
        })?;
        Ok(removed.into_iter().map(|v| self.wrap_value(v)).collect())
    }

    /// Truncate, or pad with `Null` up to [`MAX_ARRAY_LEN`].
    pub fn set_len(&self, len: usize) -> Result<()> {
        self.expect_array()?;
        if !self.writable("set_len", None) {
            return Ok(());
        }
        if len > MAX_ARRAY_LEN {
            return Err(ReactiveError::InvalidKey {
                key: PropKey::Int(i64::try_from(len).unwrap_or(i64::MAX)),
                kind: CompositeKind::Array,
            });
        }
        self.mutate_array("set_len", |items| items.resize(len, Value::Null))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn track(&self, op: TrackOp, key: TrackKey) {
        self.0.runtime.track(&self.0.target, op, key);
    }

    fn track_iteration(&self, keys_only: bool) {
        let key = match self.kind() {
            CompositeKind::Array => TrackKey::Length,
            CompositeKind::Map if keys_only => TrackKey::MapKeyIterate,
            _ => TrackKey::Iterate,
        };
        self.track(TrackOp::Iterate, key);
    }

    /// The dependency key a read of `key` subscribes to.
    pub(crate) fn track_key(&self, key: &PropKey) -> TrackKey {
        key_for(self.kind(), key)
    }

    /// Whether `key` addresses a single value of this container.
    pub(crate) fn check_key(&self, key: &PropKey) -> Result<()> {
        let kind = self.kind();
        if kind == CompositeKind::Set {
            return Err(ReactiveError::KindMismatch {
                expected: "object, array or map",
                found: kind,
            });
        }
        normalize_key(kind, key.clone()).map(|_| ())
    }

    fn expect_array(&self) -> Result<usize> {
        self.0.target.read(|data| match data {
            Composite::Array(items) => Ok(items.len()),
            other => Err(ReactiveError::KindMismatch {
                expected: "array",
                found: other.kind(),
            }),
        })
    }

    /// Wrap a nested container read from `key`, remembering where it came from.
    fn reveal(&self, key: &PropKey, value: Value) -> Value {
        if let Value::Target(nested) = &value {
            if self.0.runtime.editing_mode() == EditingMode::Update {
                nested.set_parent(&self.0.target, key.clone());
            }
        }
        self.wrap_value(value)
    }

    fn wrap_value(&self, value: Value) -> Value {
        to_reactive(&self.0.runtime, value)
    }

    fn writable(&self, action: &'static str, key: Option<&PropKey>) -> bool {
        if self.0.runtime.is_mutating() {
            return true;
        }
        if self.0.runtime.config().warn_on_rejected_write {
            tracing::warn!(
                target_id = ?self.0.target.id(),
                ?key,
                "{action} operation rejected: no transaction is open"
            );
        }
        false
    }

    /// Record and trigger one accepted keyed write.
    fn commit(
        &self,
        op: TriggerOp,
        kind: CompositeKind,
        key: &PropKey,
        new_value: Option<Value>,
        old_value: Option<Value>,
    ) {
        let patch_op = match op {
            TriggerOp::Add => PatchOp::Add,
            TriggerOp::Delete | TriggerOp::Clear => PatchOp::Remove,
            TriggerOp::Set => PatchOp::Replace,
        };
        record_mutation(
            &self.0.runtime,
            &self.0.target,
            patch_op,
            key,
            new_value.as_ref(),
            old_value.as_ref(),
        );
        self.0
            .runtime
            .trigger(&self.0.target, op, Some(key_for(kind, key)), new_value, old_value);
    }

    /// Apply `f` to the array in one step, then record and trigger the
    /// slots it changed as one batch.
    ///
    /// With the gate closed, `f` runs on a copy so the caller still gets a
    /// result, and the array is left alone.
    fn mutate_array<R>(&self, action: &'static str, f: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        self.expect_array()?;
        if !self.writable(action, None) {
            let mut scratch = self.0.target.read(|data| match data {
                Composite::Array(items) => items.clone(),
                _ => Vec::new(),
            });
            return Ok(f(&mut scratch));
        }

        let (old, new, result) = self.0.target.write(|data| match data {
            Composite::Array(items) => {
                let old = items.clone();
                let result = f(items);
                (old, items.clone(), Some(result))
            }
            _ => (Vec::new(), Vec::new(), None),
        });
        let Some(result) = result else {
            return Err(ReactiveError::KindMismatch {
                expected: "array",
                found: self.kind(),
            });
        };

        let changes = diff_arrays(&old, &new);
        let mut events = Vec::with_capacity(changes.len() + 1);
        for change in &changes {
            record_mutation(
                &self.0.runtime,
                &self.0.target,
                change.op,
                &PropKey::from(change.index),
                change.new_value.as_ref(),
                change.old_value.as_ref(),
            );
            match change.op {
                PatchOp::Replace => events.push(
                    TriggerEvent::new(TriggerOp::Set, TrackKey::Index(change.index))
                        .values(change.new_value.clone(), change.old_value.clone()),
                ),
                PatchOp::Add => events.push(
                    TriggerEvent::new(TriggerOp::Add, TrackKey::Index(change.index))
                        .values(change.new_value.clone(), None),
                ),
                PatchOp::Remove => {}
            }
        }
        if new.len() < old.len() {
            events.push(
                TriggerEvent::new(TriggerOp::Set, TrackKey::Length)
                    .values(Some(Value::from(new.len())), Some(Value::from(old.len()))),
            );
        }

        self.0.runtime.trigger_batch(&self.0.target, &events);
        Ok(result)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.0.target.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Object keys are strings; array keys must be indices.
fn normalize_key(kind: CompositeKind, key: PropKey) -> Result<PropKey> {
    match kind {
        CompositeKind::Object => Ok(PropKey::Str(key.to_field())),
        CompositeKind::Array => match key.as_index() {
            Some(index) => Ok(PropKey::from(index)),
            None => Err(ReactiveError::InvalidKey { key, kind }),
        },
        CompositeKind::Map | CompositeKind::Set => Ok(key),
    }
}

fn key_for(kind: CompositeKind, key: &PropKey) -> TrackKey {
    match kind {
        CompositeKind::Array => match key.as_index() {
            Some(index) => TrackKey::Index(index),
            None => TrackKey::Prop(key.clone()),
        },
        CompositeKind::Object => TrackKey::Prop(PropKey::Str(key.to_field())),
        CompositeKind::Map | CompositeKind::Set => TrackKey::Prop(key.clone()),
    }
}

/// Slot-level changes between two versions of an array. Removals are listed
/// last-index first, so replaying them in order pops from the end.
fn diff_arrays(old: &[Value], new: &[Value]) -> Vec<ArrayChange> {
    let mut changes = Vec::new();
    for (index, (new_value, old_value)) in new.iter().zip(old).enumerate() {
        if has_changed(new_value, old_value) {
            changes.push(ArrayChange {
                op: PatchOp::Replace,
                index,
                new_value: Some(new_value.clone()),
                old_value: Some(old_value.clone()),
            });
        }
    }
    for (index, new_value) in new.iter().enumerate().skip(old.len()) {
        changes.push(ArrayChange {
            op: PatchOp::Add,
            index,
            new_value: Some(new_value.clone()),
            old_value: None,
        });
    }
    for index in (new.len()..old.len()).rev() {
        changes.push(ArrayChange {
            op: PatchOp::Remove,
            index,
            new_value: None,
            old_value: Some(old[index].clone()),
        });
    }
    changes
}

impl Runtime {
    /// The wrapper for `target`. Wrapping the same target again from the same
    /// runtime returns the same wrapper for as long as any handle to it is
    /// alive. Each runtime gets its own wrapper.
    pub fn wrap(&self, target: &Target) -> Reactive {
        let mut proxies = target.0.proxies.lock();
        proxies.retain(|weak| weak.strong_count() > 0);
        let existing = proxies
            .iter()
            .filter_map(Weak::upgrade)
            .find(|inner| inner.runtime.ptr_eq(self));
        if let Some(inner) = existing {
            return Reactive(inner);
        }
        let reactive = Reactive(Arc::new(ReactiveInner {
            target: target.clone(),
            runtime: self.clone(),
        }));
        proxies.push(Arc::downgrade(&reactive.0));
        reactive
    }

    /// Wrap a container value. Primitives and refs cannot be wrapped.
    pub fn reactive(&self, value: impl Into<Value>) -> Option<Reactive> {
        match value.into() {
            Value::Target(target) => Some(self.wrap(&target)),
            Value::Reactive(existing) => Some(existing),
            other => {
                tracing::warn!(value = ?other, "value cannot be made reactive");
                None
            }
        }
    }
}

pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Same as [`is_reactive`]; there are no read-only wrappers.
pub fn is_proxy(value: &Value) -> bool {
    is_reactive(value)
}

/// The container behind a wrapper, or the value itself.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Reactive(r) => Value::Target(r.raw()),
        other => other.clone(),
    }
}

pub(crate) fn to_reactive(runtime: &Runtime, value: Value) -> Value {
    match value {
        Value::Target(target) => Value::Reactive(runtime.wrap(&target)),
        other => other,
    }
}
