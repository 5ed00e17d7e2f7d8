//! Subscriber identity and diagnostic events.
//!
//! Effects are the only subscribers in the system. Inspector tooling can
//! attach `on_track`/`on_trigger` hooks to an effect and receive a
//! [`DebuggerEvent`] each time it subscribes to, or is woken by, a key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::graph::{DepId, TargetId, TrackKey, TrackOp, TriggerOp, Value};

/// Unique identifier for a subscriber.
///
/// Each effect gets a unique ID when created. This ID is used to key the
/// subscriber sets and to detect recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a tracked read or triggering write was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSource {
    Target(TargetId),
    Ref(DepId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugOp {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Payload for `on_track` and `on_trigger` hooks.
#[derive(Debug, Clone)]
pub struct DebuggerEvent {
    pub effect: SubscriberId,
    pub source: DebugSource,
    pub op: DebugOp,
    pub key: Option<TrackKey>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

/// Event data before an effect is attached to it.
#[derive(Debug, Clone)]
pub(crate) struct EventInfo {
    pub source: DebugSource,
    pub op: DebugOp,
    pub key: Option<TrackKey>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

impl EventInfo {
    pub fn track(source: DebugSource, op: TrackOp, key: TrackKey) -> Self {
        Self {
            source,
            op: DebugOp::Track(op),
            key: Some(key),
            new_value: None,
            old_value: None,
        }
    }

    pub fn for_effect(&self, effect: SubscriberId) -> DebuggerEvent {
        DebuggerEvent {
            effect,
            source: self.source,
            op: self.op,
            key: self.key.clone(),
            new_value: self.new_value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}

pub type DebuggerHook = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn event_info_is_stamped_with_the_effect() {
        let info = EventInfo::track(
            DebugSource::Ref(crate::graph::Dep::new().id()),
            TrackOp::Get,
            TrackKey::Value,
        );
        let id = SubscriberId::new();
        let event = info.for_effect(id);
        assert_eq!(event.effect, id);
        assert_eq!(event.op, DebugOp::Track(TrackOp::Get));
        assert_eq!(event.key, Some(TrackKey::Value));
    }
}
