//! Subscriber sets.
//!
//! A [`Dep`] is the set of effects that read one (container, key) pair, or
//! the single slot of a ref. Effects are held weakly and in insertion order,
//! so that triggering runs subscribers in the order they first subscribed.
//!
//! A dep that belongs to a container key removes itself from the
//! container's table once its last subscriber leaves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::key::TrackKey;
use super::target::{Target, TargetInner};
use crate::reactive::{Effect, EffectInner, SubscriberId};

/// Unique identifier for a dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The container table entry a dep lives in.
struct Owner {
    target: Weak<TargetInner>,
    key: TrackKey,
}

struct DepInner {
    id: DepId,
    subscribers: Mutex<IndexMap<SubscriberId, Weak<EffectInner>>>,
    owner: Option<Owner>,
}

#[derive(Clone)]
pub struct Dep(Arc<DepInner>);

impl Dep {
    pub fn new() -> Self {
        Self(Arc::new(DepInner {
            id: DepId::next(),
            subscribers: Mutex::new(IndexMap::new()),
            owner: None,
        }))
    }

    /// A dep stored in `target`'s table under `key`.
    pub(crate) fn owned(target: &Target, key: TrackKey) -> Self {
        Self(Arc::new(DepInner {
            id: DepId::next(),
            subscribers: Mutex::new(IndexMap::new()),
            owner: Some(Owner {
                target: Arc::downgrade(&target.0),
                key,
            }),
        }))
    }

    pub fn id(&self) -> DepId {
        self.0.id
    }

    pub(crate) fn subscribe(&self, effect: &Effect) {
        self.0
            .subscribers
            .lock()
            .entry(effect.id())
            .or_insert_with(|| effect.downgrade());
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        let emptied = {
            let mut subscribers = self.0.subscribers.lock();
            subscribers.shift_remove(&id).is_some() && subscribers.is_empty()
        };
        if !emptied {
            return;
        }
        if let Some(owner) = &self.0.owner {
            if let Some(target) = owner.target.upgrade() {
                Target(target).forget_dep(&owner.key, self.0.id);
            }
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.0.subscribers.lock().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.lock().len()
    }

    /// Live subscribers in subscription order. Dropped effects are pruned.
    pub(crate) fn effects(&self) -> Vec<Effect> {
        let mut subscribers = self.0.subscribers.lock();
        let mut live = Vec::with_capacity(subscribers.len());
        subscribers.retain(|_, weak| match Effect::upgrade(weak) {
            Some(effect) => {
                live.push(effect);
                true
            }
            None => false,
        });
        live
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dep_ids_are_unique() {
        let a = Dep::new();
        let b = Dep::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn unowned_dep_survives_unsubscribe() {
        let dep = Dep::new();
        dep.unsubscribe(SubscriberId::new());
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn empty_dep_has_no_effects() {
        let dep = Dep::new();
        assert_eq!(dep.subscriber_count(), 0);
        assert!(dep.effects().is_empty());
    }
}
