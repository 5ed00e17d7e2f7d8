//! Dependency Graph
//!
//! The data side of the reactive system: the values that can be stored,
//! the containers that can be wrapped, and the per-container tables that
//! record which effects read which keys.
//!
//! # Overview
//!
//! - A [`Target`] is a raw container (object, array, map or set). It owns
//!   a table from [`TrackKey`] to [`Dep`].
//! - A [`Dep`] is an ordered set of weakly-held effects.
//! - `track` adds the running effect to the `Dep` of the key being read;
//!   `trigger` collects the `Dep`s touched by a write and re-runs their
//!   effects. Both live on [`crate::Runtime`].
//!
//! Because each container owns its own table, a dependency is dropped
//! together with its container and no weak registry is needed.

mod dep;
mod key;
mod target;
mod value;

pub use dep::{Dep, DepId};
pub use key::{PropKey, TrackKey, TrackOp, TriggerOp};
pub use target::{Composite, CompositeKind, Target, TargetId};
pub use value::{has_changed, same_value, same_value_zero, strict_equals, Value};
