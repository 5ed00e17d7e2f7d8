//! Keys and operation kinds.
//!
//! A container is addressed by [`PropKey`]s; the dependency table of a
//! container is keyed by [`TrackKey`], which adds the synthetic keys used
//! for length and enumeration dependencies.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A property key: an object field, an array index, or a map/set entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropKey {
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
}

impl PropKey {
    /// Interpret the key as an array index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PropKey::Int(n) if *n >= 0 => usize::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Object fields are always strings; other keys are stringified.
    pub fn to_field(&self) -> Arc<str> {
        match self {
            PropKey::Str(s) => Arc::clone(s),
            other => Arc::from(other.to_string()),
        }
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Int(n) => write!(f, "{n}"),
            PropKey::Bool(b) => write!(f, "{b}"),
            PropKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropKey {
    fn from(s: &str) -> Self {
        PropKey::Str(Arc::from(s))
    }
}

impl From<String> for PropKey {
    fn from(s: String) -> Self {
        PropKey::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for PropKey {
    fn from(s: Arc<str>) -> Self {
        PropKey::Str(s)
    }
}

impl From<i64> for PropKey {
    fn from(n: i64) -> Self {
        PropKey::Int(n)
    }
}

impl From<i32> for PropKey {
    fn from(n: i32) -> Self {
        PropKey::Int(i64::from(n))
    }
}

impl From<usize> for PropKey {
    fn from(n: usize) -> Self {
        PropKey::Int(n as i64)
    }
}

impl From<bool> for PropKey {
    fn from(b: bool) -> Self {
        PropKey::Bool(b)
    }
}

/// A key in a container's dependency table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// An object field or map/set entry.
    Prop(PropKey),
    /// An array slot.
    Index(usize),
    /// Array length.
    Length,
    /// Enumeration of an object, set, or map values.
    Iterate,
    /// Enumeration of map keys.
    MapKeyIterate,
    /// The single slot of a ref cell.
    Value,
}

/// How a read touched its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// How a write changed its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}
