//! Wrappable containers.
//!
//! A [`Target`] owns its data together with its own key → [`Dep`] table, so
//! a dependency lives exactly as long as the container it describes. No
//! global registry is consulted on `track`/`trigger`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};

use super::dep::{Dep, DepId};
use super::key::{PropKey, TrackKey};
use super::value::Value;
use crate::reactive::ReactiveInner;

/// Unique identifier for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The data held by a container.
#[derive(Clone)]
pub enum Composite {
    Object(IndexMap<Arc<str>, Value>),
    Array(Vec<Value>),
    Map(IndexMap<PropKey, Value>),
    Set(IndexSet<PropKey>),
}

impl Composite {
    pub fn kind(&self) -> CompositeKind {
        match self {
            Composite::Object(_) => CompositeKind::Object,
            Composite::Array(_) => CompositeKind::Array,
            Composite::Map(_) => CompositeKind::Map,
            Composite::Set(_) => CompositeKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Composite::Object(m) => m.len(),
            Composite::Array(v) => v.len(),
            Composite::Map(m) => m.len(),
            Composite::Set(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    Object,
    Array,
    Map,
    Set,
}

impl fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompositeKind::Object => "object",
            CompositeKind::Array => "array",
            CompositeKind::Map => "map",
            CompositeKind::Set => "set",
        })
    }
}

/// Link from a nested container to the container (and key) it was read from.
struct ParentLink {
    parent: Weak<TargetInner>,
    key: PropKey,
}

pub(crate) struct TargetInner {
    id: TargetId,
    data: RwLock<Composite>,
    deps: Mutex<HashMap<TrackKey, Dep>>,
    /// Cached wrappers, at most one live entry per runtime, so that
    /// wrapping twice yields the same handle.
    pub(crate) proxies: Mutex<Vec<Weak<ReactiveInner>>>,
    parent: Mutex<Option<ParentLink>>,
}

/// A raw container. Reads and writes through a `Target` are never tracked;
/// go through [`crate::Reactive`] for that.
#[derive(Clone)]
pub struct Target(pub(crate) Arc<TargetInner>);

impl Target {
    pub fn new(data: Composite) -> Self {
        Self(Arc::new(TargetInner {
            id: TargetId::next(),
            data: RwLock::new(data),
            deps: Mutex::new(HashMap::new()),
            proxies: Mutex::new(Vec::new()),
            parent: Mutex::new(None),
        }))
    }

    pub fn object<K, V, I>(fields: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(Composite::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::new(Composite::Array(items.into_iter().map(Into::into).collect()))
    }

    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<PropKey>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(Composite::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn set<K, I>(members: I) -> Self
    where
        K: Into<PropKey>,
        I: IntoIterator<Item = K>,
    {
        Self::new(Composite::Set(members.into_iter().map(Into::into).collect()))
    }

    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn kind(&self) -> CompositeKind {
        self.0.data.read().kind()
    }

    pub fn len(&self) -> usize {
        self.0.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Inspect the data without tracking.
    pub fn read<R>(&self, f: impl FnOnce(&Composite) -> R) -> R {
        f(&self.0.data.read())
    }

    /// Mutate the data without triggering anything.
    pub fn write<R>(&self, f: impl FnOnce(&mut Composite) -> R) -> R {
        f(&mut self.0.data.write())
    }

    /// Untracked lookup of an object field, array slot or map entry.
    pub fn get_raw(&self, key: &PropKey) -> Option<Value> {
        self.read(|data| match data {
            Composite::Object(fields) => fields.get(&*key.to_field()).cloned(),
            Composite::Array(items) => key.as_index().and_then(|i| items.get(i).cloned()),
            Composite::Map(entries) => entries.get(key).cloned(),
            Composite::Set(members) => members.get(key).cloned().map(Value::from),
        })
    }

    /// Untracked insert into an object or map. Other kinds are left alone.
    pub fn insert_raw(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.write(|data| match data {
            Composite::Object(fields) => {
                fields.insert(key.to_field(), value);
            }
            Composite::Map(entries) => {
                entries.insert(key, value);
            }
            Composite::Array(_) | Composite::Set(_) => {}
        });
    }

    /// Number of keys that currently have a dependency entry.
    pub fn dep_count(&self) -> usize {
        self.0.deps.lock().len()
    }

    pub(crate) fn dep(&self, key: &TrackKey) -> Option<Dep> {
        self.0.deps.lock().get(key).cloned()
    }

    pub(crate) fn dep_or_insert(&self, key: TrackKey) -> Dep {
        self.0
            .deps
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Dep::owned(self, key))
            .clone()
    }

    /// Drop the entry for `key` if it is still `dep` and nobody subscribes to it.
    pub(crate) fn forget_dep(&self, key: &TrackKey, dep: DepId) {
        let mut deps = self.0.deps.lock();
        let unused = deps
            .get(key)
            .is_some_and(|entry| entry.id() == dep && entry.subscriber_count() == 0);
        if unused {
            deps.remove(key);
        }
    }

    pub(crate) fn deps_where(&self, mut pred: impl FnMut(&TrackKey) -> bool) -> Vec<Dep> {
        self.0
            .deps
            .lock()
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(_, dep)| dep.clone())
            .collect()
    }

    pub(crate) fn set_parent(&self, parent: &Target, key: PropKey) {
        *self.0.parent.lock() = Some(ParentLink {
            parent: Arc::downgrade(&parent.0),
            key,
        });
    }

    /// Path of keys from the outermost known ancestor down to this container.
    pub(crate) fn path(&self) -> Vec<PropKey> {
        let mut path = Vec::new();
        let mut current = Arc::clone(&self.0);
        let mut hops = 0usize;
        loop {
            let link = current
                .parent
                .lock()
                .as_ref()
                .and_then(|link| link.parent.upgrade().map(|p| (p, link.key.clone())));
            match link {
                // A container can be re-parented into a cycle; stop after a generous bound.
                Some((parent, key)) if hops < 1024 => {
                    path.push(key);
                    current = parent;
                    hops += 1;
                }
                _ => break,
            }
        }
        path.reverse();
        path
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
