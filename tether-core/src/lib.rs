//! Tether Core
//!
//! This crate provides a fine-grained reactive dependency-tracking runtime
//! for document models. It implements:
//!
//! - Reactive containers and ref cells whose reads are recorded
//! - Effects that re-run when what they read changes
//! - Effect scopes and watchers built on top of effects
//! - A mutation gate that only accepts writes inside transactions
//! - Patch recording with undo and redo
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: values, raw containers and their dependency tables
//! - `reactive`: the runtime, effects, wrappers, refs, scopes and watchers
//! - `transaction`: the mutation gate and patches
//! - `config`: runtime settings
//! - `error`: error types and handling of panics raised by user code
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use tether_core::{Runtime, Target, Value};
//!
//! let rt = Runtime::new();
//! let doc = rt.wrap(&Target::object([("title", "draft")]));
//!
//! // Record every title the effect sees
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let (d, s) = (doc.clone(), seen.clone());
//! let _effect = rt.effect(move || s.lock().push(d.get("title").unwrap()));
//!
//! // Writes are only accepted inside a transaction
//! doc.set("title", "ignored").unwrap();
//! rt.transaction(|| doc.set("title", "final")).unwrap();
//!
//! assert_eq!(*seen.lock(), vec![Value::from("draft"), Value::from("final")]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod transaction;

pub use config::{ErrorPolicy, RuntimeConfig};
pub use error::{ErrorCode, ReactiveError, Result};
pub use graph::{Composite, CompositeKind, PropKey, Target, TrackKey, TrackOp, TriggerOp, Value};
pub use reactive::{
    is_proxy, is_reactive, is_ref, proxy_refs, stop, to_raw, to_ref, to_refs, traverse,
    trigger_ref, unref, DebuggerEvent, Effect, EffectOptions, EffectScope, Invalidator,
    ProxyRefs, Reactive, Ref, RefTracker, Runtime, WatchHandle, WatchOptions, WatchSource,
    MAX_ARRAY_LEN,
};
pub use transaction::{apply_patches, undo_patches, EditingMode, Patch, PatchOp};
