//! Dynamic values stored in observed containers.
//!
//! Primitives are stored inline. Objects and arrays are always reactive
//! containers: there is no way to place an unobserved container inside an
//! observed one, so "is this value observed" is answered by its type.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};
use serde_json::Value as Json;

use super::array::ReactiveArray;
use super::object::ReactiveObject;
use super::observer;
use super::runtime::WeakRuntime;

/// Identity of an observed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ReactiveArray),
    Object(ReactiveObject),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
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

    /// The number as an integer, if it has no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// JavaScript-style truthiness, handy in conditional derivations.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Identity comparison used by field writes: containers are the same
    /// only if they are the same container; primitives compare by value,
    /// with NaN equal to NaN.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => numbers_equal(*a, *b),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    /// Identity of a container value.
    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            Value::Array(a) => Some(a.id()),
            Value::Object(o) => Some(o.id()),
            _ => None,
        }
    }

    /// Untracked plain snapshot. NaN and infinities become `null`, and so
    /// does a reference back to a container that is still being written.
    pub fn to_json(&self) -> Json {
        let mut visiting = HashSet::new();
        to_json_inner(self, &mut visiting)
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn to_json_inner(value: &Value, visiting: &mut HashSet<ContainerId>) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => Json::String(s.to_string()),
        Value::Array(array) => {
            if !visiting.insert(array.id()) {
                return Json::Null;
            }
            let items = array
                .items_untracked()
                .iter()
                .map(|item| to_json_inner(item, visiting))
                .collect();
            visiting.remove(&array.id());
            Json::Array(items)
        }
        Value::Object(object) => {
            if !visiting.insert(object.id()) {
                return Json::Null;
            }
            let map = object
                .entries_untracked()
                .into_iter()
                .map(|(key, item)| (key, to_json_inner(&item, visiting)))
                .collect();
            visiting.remove(&object.id());
            Json::Object(map)
        }
    }
}

/// Structural equality with a set of container pairs already under
/// comparison, so cyclic graphs terminate.
fn structural_eq(a: &Value, b: &Value, seen: &mut HashSet<(ContainerId, ContainerId)>) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.id(), y.id())) {
                return true;
            }
            let xs = x.items_untracked();
            let ys = y.items_untracked();
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(p, q)| structural_eq(p, q, seen))
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.id(), y.id())) {
                return true;
            }
            let xs = x.entries_untracked();
            let ys = y.entries_untracked();
            xs.len() == ys.len()
                && xs.iter().all(|(key, p)| {
                    ys.iter()
                        .find(|(other, _)| other == key)
                        .is_some_and(|(_, q)| structural_eq(p, q, seen))
                })
        }
        _ => a.same_value(b),
    }
}

/// Structural equality. NaN equals NaN; object key order is ignored.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        structural_eq(self, other, &mut HashSet::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(a) => a.fmt(f),
            Value::Object(o) => o.fmt(f),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
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

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ReactiveObject> for Value {
    fn from(o: ReactiveObject) -> Self {
        Value::Object(o)
    }
}

impl From<ReactiveArray> for Value {
    fn from(a: ReactiveArray) -> Self {
        Value::Array(a)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

/// Conversion into a [`Value`] that may need to observe plain data.
///
/// Plain `serde_json` input is observed into fresh reactive containers
/// bound to the writer's runtime; everything else converts directly.
pub trait IntoValue {
    fn into_value(self, rt: &WeakRuntime) -> Value;
}

impl IntoValue for Value {
    fn into_value(self, _rt: &WeakRuntime) -> Value {
        self
    }
}

impl IntoValue for Json {
    fn into_value(self, rt: &WeakRuntime) -> Value {
        observer::observe_json(rt, self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self, rt: &WeakRuntime) -> Value {
        match self {
            Some(v) => v.into_value(rt),
            None => Value::Null,
        }
    }
}

macro_rules! into_value_via_from {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self, _rt: &WeakRuntime) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

into_value_via_from!(
    bool,
    f64,
    i32,
    i64,
    u32,
    u64,
    usize,
    &str,
    String,
    ReactiveObject,
    ReactiveArray,
    ()
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use serde_json::json;

    #[test]
    fn nan_is_the_same_value_as_nan() {
        assert!(Value::from(f64::NAN).same_value(&Value::from(f64::NAN)));
        assert!(Value::from(5).same_value(&Value::from(5.0)));
        assert!(!Value::from(5).same_value(&Value::from("5")));
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
    }

    #[test]
    fn containers_compare_structurally_but_not_by_identity() {
        let rt = Runtime::new();
        let a = rt.observe(json!({"x": 1, "list": [1, 2]}));
        let b = rt.observe(json!({"list": [1, 2], "x": 1}));
        assert_eq!(a, b);
        assert!(!a.same_value(&b));
        assert!(a.same_value(&a.clone()));

        let c = rt.observe(json!({"x": 1, "list": [1, 3]}));
        assert_ne!(a, c);
    }

    #[test]
    fn snapshot_round_trips_plain_data() {
        let rt = Runtime::new();
        let data = json!({
            "name": "ada",
            "age": 36,
            "tags": ["a", "b"],
            "ratio": 0.5,
            "none": null
        });
        assert_eq!(rt.observe(data.clone()).to_json(), data);
    }

    #[test]
    fn nan_snapshots_as_null() {
        assert_eq!(Value::from(f64::NAN).to_json(), Json::Null);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::from(true).is_truthy());
    }

    #[test]
    fn serialize_uses_snapshot() {
        let rt = Runtime::new();
        let value = rt.observe(json!({"a": [1, 2]}));
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"a":[1,2]}"#);
    }
}
