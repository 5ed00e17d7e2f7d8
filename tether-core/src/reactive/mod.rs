//! Reactive Primitives
//!
//! This module implements the core reactive system: containers, refs,
//! effects, scopes and watchers. These primitives form the foundation of
//! Tether's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Containers
//!
//! A [`Reactive`] wraps a raw container. Reads through it are recorded as
//! dependencies of the running effect; writes through it re-run the effects
//! that read the keys they touched.
//!
//! ## Refs
//!
//! A [`Ref`] is a single reactive slot with the same read/write contract,
//! for values that do not live inside a container.
//!
//! ## Effects
//!
//! An [`Effect`] is a computation that runs whenever its dependencies
//! change. Each run re-subscribes it to exactly the keys it read, so
//! branches inside the computation decide what it reacts to next time.
//!
//! ## Scopes and watchers
//!
//! An [`EffectScope`] stops a group of effects together. A watcher, created
//! with [`Runtime::watch`], is an effect that compares old and new values
//! and calls a callback on change.
//!
//! # Implementation Notes
//!
//! All engine state lives in an explicit [`Runtime`] rather than in
//! globals. Every handle keeps the runtime it was created from, so several
//! runtimes can coexist in one process.

mod cell;
mod container;
mod context;
mod effect;
mod runtime;
mod scope;
mod subscriber;
mod watch;

pub use cell::{is_ref, proxy_refs, to_ref, to_refs, trigger_ref, unref, ProxyRefs, Ref, RefTracker};
pub use container::{is_proxy, is_reactive, to_raw, Reactive, MAX_ARRAY_LEN};
pub use effect::{stop, Effect, EffectOptions, SchedulerFn};
pub use runtime::Runtime;
pub use scope::EffectScope;
pub use subscriber::{DebugOp, DebugSource, DebuggerEvent, DebuggerHook, SubscriberId};
pub use watch::{traverse, Invalidator, WatchHandle, WatchOptions, WatchSource};

pub(crate) use container::ReactiveInner;
pub(crate) use effect::EffectInner;
