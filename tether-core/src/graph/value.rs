//! Dynamic values stored in reactive containers and ref cells.
//!
//! Primitives compare by value; containers, wrappers and refs compare by
//! identity. A raw [`Target`] and the [`Reactive`] wrapping it are distinct
//! values, exactly like an object and the proxy standing in front of it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::key::PropKey;
use super::target::{Composite, Target, TargetId};
use crate::reactive::{Reactive, Ref};

/// A value held by a container or ref.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    /// A raw, untracked container.
    Target(Target),
    /// A tracked container handle.
    Reactive(Reactive),
    /// A ref cell.
    Ref(Ref),
}

impl Value {
    /// Build a raw object from `(field, value)` pairs.
    pub fn object<K, V, I>(fields: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Target(Target::object(fields))
    }

    /// Build a raw array.
    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Target(Target::array(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Value::Target(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_ref_cell(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this is a container, raw or wrapped.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Target(_) | Value::Reactive(_))
    }

    /// Deep, untracked copy into JSON. Cycles collapse to `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        to_json_inner(self, &mut seen)
    }
}

fn to_json_inner(value: &Value, seen: &mut HashSet<TargetId>) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => Json::String(s.to_string()),
        Value::Reactive(r) => to_json_inner(&Value::Target(r.raw()), seen),
        Value::Ref(r) => to_json_inner(&r.get_untracked(), seen),
        Value::Target(t) => {
            if !seen.insert(t.id()) {
                return Json::Null;
            }
            let json = t.read(|data| match data {
                Composite::Object(fields) => Json::Object(
                    fields
                        .iter()
                        .map(|(k, v)| (k.to_string(), to_json_inner(v, seen)))
                        .collect(),
                ),
                Composite::Array(items) => {
                    Json::Array(items.iter().map(|v| to_json_inner(v, seen)).collect())
                }
                Composite::Map(entries) => Json::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), to_json_inner(v, seen)))
                        .collect(),
                ),
                Composite::Set(members) => Json::Array(
                    members
                        .iter()
                        .map(|k| to_json_inner(&Value::from(k.clone()), seen))
                        .collect(),
                ),
            });
            seen.remove(&t.id());
            json
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(Arc::from(s)),
            Json::Array(items) => Value::Target(Target::new(Composite::Array(
                items.into_iter().map(Value::from).collect(),
            ))),
            Json::Object(fields) => {
                let fields: IndexMap<Arc<str>, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (Arc::from(k), Value::from(v)))
                    .collect();
                Value::Target(Target::new(Composite::Object(fields)))
            }
        }
    }
}

/// `Object.is` semantics: NaN equals NaN, `+0` differs from `-0`.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits()
        }
        _ => identity_eq(a, b),
    }
}

/// Whether a write of `new` over `old` is an observable change.
pub fn has_changed(new: &Value, old: &Value) -> bool {
    !same_value(new, old)
}

/// `===` semantics, used by `index_of`.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => identity_eq(a, b),
    }
}

/// `SameValueZero` semantics, used by `includes`.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => identity_eq(a, b),
    }
}

fn identity_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Target(x), Value::Target(y)) => x.ptr_eq(y),
        (Value::Reactive(x), Value::Reactive(y)) => x.ptr_eq(y),
        (Value::Ref(x), Value::Ref(y)) => x.ptr_eq(y),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Target(t) => write!(f, "Target({:?}, {})", t.id(), t.kind()),
            Value::Reactive(r) => write!(f, "Reactive({:?}, {})", r.raw().id(), r.kind()),
            Value::Ref(_) => f.write_str("Ref(..)"),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl From<PropKey> for Value {
    fn from(key: PropKey) -> Self {
        match key {
            PropKey::Int(n) => Value::Number(n as f64),
            PropKey::Bool(b) => Value::Bool(b),
            PropKey::Str(s) => Value::String(s),
        }
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Value::Target(t)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_unchanged() {
        assert!(!has_changed(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(has_changed(&Value::Number(0.0), &Value::Number(-0.0)));
        assert!(!has_changed(&Value::from(1), &Value::from(1.0)));
    }

    #[test]
    fn equality_flavours_differ_on_nan_and_zero() {
        let nan = Value::Number(f64::NAN);
        assert!(!strict_equals(&nan, &nan));
        assert!(same_value_zero(&nan, &nan));
        assert!(strict_equals(&Value::Number(0.0), &Value::Number(-0.0)));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::array([1, 2]);
        let b = Value::array([1, 2]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn json_conversion_is_deep() {
        let source = json!({"title": "doc", "blocks": [{"text": "a"}, {"text": "b"}], "count": 2});
        let value = Value::from(source.clone());
        assert!(value.is_composite());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn cyclic_values_serialize_without_looping() {
        let outer = Target::object([("name", Value::from("outer"))]);
        outer.insert_raw("me", Value::Target(outer.clone()));
        let json = Value::Target(outer).to_json();
        assert_eq!(json["me"], serde_json::Value::Null);
    }
}
