//! Observation of plain data.
//!
//! [`observe_json`] walks plain `serde_json` input and builds the reactive
//! tree: objects become [`ReactiveObject`]s with one tracked field per key,
//! arrays become [`ReactiveArray`]s, and primitives are stored as they are.
//! Plain input is a tree, so the walk always terminates.
//!
//! The helpers below extend a read to the structure under it:
//!
//! - [`depend_child`]: a derivation that reads a container-valued field
//!   also subscribes to the container's structural registry, so a push or
//!   an added key re-runs it.
//! - [`traverse`]: a deep read of everything reachable, used by deep
//!   watchers.
//!
//! Observed containers can be linked into cycles after observation (a
//! container stored inside itself), so both helpers keep a visited set.

use std::collections::HashSet;

use serde_json::Value as Json;

use crate::error::{ReactiveError, Result};

use super::array::ReactiveArray;
use super::object::ReactiveObject;
use super::runtime::{Runtime, WeakRuntime};
use super::value::{ContainerId, Value};

/// Convert plain data into reactive values bound to `rt`.
pub(crate) fn observe_json(rt: &WeakRuntime, data: Json) -> Value {
    match data {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
        Json::String(s) => Value::from(s),
        Json::Array(items) => {
            let items = items.into_iter().map(|item| observe_json(rt, item)).collect();
            Value::Array(ReactiveArray::from_items(rt, items))
        }
        Json::Object(map) => {
            let entries = map.into_iter().map(|(key, item)| (key, observe_json(rt, item)));
            Value::Object(ReactiveObject::from_entries(rt, entries))
        }
    }
}

/// Subscribe the active derivation to the structure of `value`, if it is a
/// container. Arrays also pass this on to nested container elements.
pub(crate) fn depend_child(rt: &Runtime, value: &Value) {
    match value {
        Value::Object(object) => {
            rt.context().track(object.dep());
        }
        Value::Array(array) => {
            rt.context().track(array.dep());
            let mut seen = HashSet::from([array.id()]);
            depend_items(rt, &array.items_untracked(), &mut seen);
        }
        _ => {}
    }
}

/// Subscribe to the structure of every container element of `items`.
pub(crate) fn depend_array(rt: &Runtime, items: &[Value]) {
    depend_items(rt, items, &mut HashSet::new());
}

fn depend_items(rt: &Runtime, items: &[Value], seen: &mut HashSet<ContainerId>) {
    for item in items {
        match item {
            Value::Object(object) => {
                rt.context().track(object.dep());
            }
            Value::Array(array) => {
                if seen.insert(array.id()) {
                    rt.context().track(array.dep());
                    depend_items(rt, &array.items_untracked(), seen);
                }
            }
            _ => {}
        }
    }
}

/// Tracked read of every field and element reachable from `value`.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<ContainerId>) {
    match value {
        Value::Object(object) => {
            if seen.insert(object.id()) {
                for (_, child) in object.entries() {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::Array(array) => {
            if seen.insert(array.id()) {
                for child in array.to_vec() {
                    traverse_inner(&child, seen);
                }
            }
        }
        _ => {}
    }
}

/// Split a dotted path. Segments are non-empty runs of ASCII letters,
/// digits, `_` and `$`.
pub(crate) fn parse_path(path: &str) -> Result<Vec<&str>> {
    let valid = |segment: &&str| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().all(valid) {
        Ok(segments)
    } else {
        Err(ReactiveError::InvalidPath(path.to_string()))
    }
}

/// Tracked read of a dotted path starting at `root`. Numeric segments index
/// arrays; `length` reads an array's length.
pub fn resolve_path(root: Value, path: &str) -> Result<Value> {
    let segments = parse_path(path)?;
    resolve_segments(root, path, &segments)
}

pub(crate) fn resolve_segments(root: Value, path: &str, segments: &[&str]) -> Result<Value> {
    segments
        .iter()
        .try_fold(root, |current, segment| step(&current, segment, path))
}

fn step(current: &Value, segment: &str, path: &str) -> Result<Value> {
    let not_found = || ReactiveError::PathNotFound {
        path: path.to_string(),
        segment: segment.to_string(),
    };
    match current {
        Value::Object(object) => object.get(segment).map_err(|_| not_found()),
        Value::Array(array) if segment == "length" => Ok(Value::from(array.len())),
        Value::Array(array) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| array.get(index))
            .ok_or_else(not_found),
        _ => Err(not_found()),
    }
}

/// Anything a dotted-path watch expression can be evaluated against.
pub trait PathSource {
    fn resolve(&self, path: &str) -> Result<Value>;
}

impl PathSource for ReactiveObject {
    fn resolve(&self, path: &str) -> Result<Value> {
        self.get_path(path)
    }
}

impl PathSource for Value {
    fn resolve(&self, path: &str) -> Result<Value> {
        resolve_path(self.clone(), path)
    }
}
