//! Observed objects.
//!
//! A [`ReactiveObject`] is an insertion-ordered map of tracked fields. Every
//! field owns a [`Dep`]; the object owns one more for its key set.
//!
//! # How Fields Work
//!
//! 1. Reading a field inside a tracked evaluation subscribes the running
//!    derivation to the field's registry. If the field holds a container,
//!    the derivation also subscribes to that container's structural
//!    registry.
//!
//! 2. Writing a field with an identical value does nothing. Otherwise the
//!    value is stored (plain input is observed first) and the field's
//!    registry notifies.
//!
//! 3. Keys are added and removed only through [`insert`](ReactiveObject::insert)
//!    and [`remove`](ReactiveObject::remove), which notify the key-set
//!    registry. [`set`](ReactiveObject::set) on an undeclared key is an error.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::{ReactiveError, Result};

use super::dep::Dep;
use super::observer;
use super::runtime::{Runtime, WeakRuntime};
use super::value::{ContainerId, IntoValue, Value};

/// One field of an observed object.
struct TrackedField {
    value: Value,
    dep: Dep,
}

impl TrackedField {
    fn new(value: Value) -> Self {
        Self { value, dep: Dep::new() }
    }
}

struct ObjectInner {
    id: ContainerId,
    rt: WeakRuntime,
    fields: RefCell<IndexMap<String, TrackedField>>,
    /// Notified when keys are added or removed.
    dep: Dep,
}

/// An observed object.
///
/// Cloning a `ReactiveObject` creates a new handle to the same object.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Rc<ObjectInner>,
}

impl ReactiveObject {
    /// Create an empty object bound to `rt`.
    pub fn new(rt: &Runtime) -> Self {
        Self::from_entries(&rt.downgrade(), std::iter::empty())
    }

    pub(crate) fn from_entries(
        rt: &WeakRuntime,
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        let fields = entries
            .into_iter()
            .map(|(key, value)| (key, TrackedField::new(value)))
            .collect();
        Self {
            inner: Rc::new(ObjectInner {
                id: ContainerId::new(),
                rt: rt.clone(),
                fields: RefCell::new(fields),
                dep: Dep::new(),
            }),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The key-set registry.
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    /// The registry of one field, if declared.
    pub fn field_dep(&self, key: &str) -> Option<Dep> {
        self.inner.fields.borrow().get(key).map(|field| field.dep.clone())
    }

    /// Read a field, subscribing the active derivation.
    ///
    /// Reading an undeclared key subscribes to the key set, so a later
    /// `insert` of that key re-runs the reader.
    pub fn get(&self, key: &str) -> Result<Value> {
        let found = {
            let fields = self.inner.fields.borrow();
            fields.get(key).map(|field| (field.value.clone(), field.dep.clone()))
        };
        match found {
            Some((value, dep)) => {
                self.track(&dep, Some(&value));
                Ok(value)
            }
            None => {
                self.track(&self.inner.dep, None);
                Err(ReactiveError::UnknownField(key.to_string()))
            }
        }
    }

    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner.fields.borrow().get(key).map(|field| field.value.clone())
    }

    /// Write a declared field.
    pub fn set(&self, key: &str, value: impl IntoValue) -> Result<()> {
        let value = value.into_value(&self.inner.rt);
        match self.write_field(key, value) {
            Ok(_) => Ok(()),
            Err(_) => Err(ReactiveError::UnknownField(key.to_string())),
        }
    }

    /// Store `value` in a declared field and notify if it changed.
    ///
    /// Returns the previous value, or hands `value` back if `key` is not
    /// declared.
    fn write_field(&self, key: &str, value: Value) -> std::result::Result<Value, Value> {
        let (dep, previous) = {
            let mut fields = self.inner.fields.borrow_mut();
            let Some(field) = fields.get_mut(key) else {
                return Err(value);
            };
            if field.value.same_value(&value) {
                return Ok(value);
            }
            let previous = std::mem::replace(&mut field.value, value);
            (field.dep.clone(), previous)
        };
        trace!(object = ?self.inner.id, key, "field write");
        self.notify(&dep);
        Ok(previous)
    }

    /// Write a declared field from its current (untracked) value.
    pub fn update<V, F>(&self, key: &str, f: F) -> Result<()>
    where
        V: IntoValue,
        F: FnOnce(&Value) -> V,
    {
        let current = self
            .get_untracked(key)
            .ok_or_else(|| ReactiveError::UnknownField(key.to_string()))?;
        self.set(key, f(&current))
    }

    /// Add a reactive field, or write it if already declared.
    ///
    /// Returns the previous value of an existing field.
    pub fn insert(&self, key: impl Into<String>, value: impl IntoValue) -> Option<Value> {
        let key = key.into();
        let value = match self.write_field(&key, value.into_value(&self.inner.rt)) {
            Ok(previous) => return Some(previous),
            Err(value) => value,
        };
        self.inner
            .fields
            .borrow_mut()
            .insert(key.clone(), TrackedField::new(value));
        trace!(object = ?self.inner.id, key = %key, "field added");
        self.notify(&self.inner.dep);
        None
    }

    /// Delete a reactive field. Readers of the field and of the key set are
    /// notified.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.fields.borrow_mut().shift_remove(key)?;
        trace!(object = ?self.inner.id, key, "field removed");
        self.notify(&removed.dep);
        self.notify(&self.inner.dep);
        Some(removed.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.track(&self.inner.dep, None);
        self.inner.fields.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.track(&self.inner.dep, None);
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.track(&self.inner.dep, None);
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every field, subscribing to the key set and to each field.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.track(&self.inner.dep, None);
        let keys: Vec<String> = self.inner.fields.borrow().keys().cloned().collect();
        keys.into_iter()
            .filter_map(|key| self.get(&key).ok().map(|value| (key, value)))
            .collect()
    }

    pub(crate) fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(key, field)| (key.clone(), field.value.clone()))
            .collect()
    }

    /// Tracked dotted-path read, e.g. `"user.tags.0"`.
    pub fn get_path(&self, path: &str) -> Result<Value> {
        observer::resolve_path(Value::Object(self.clone()), path)
    }

    /// Untracked plain snapshot.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.clone()).to_json()
    }

    fn track(&self, dep: &Dep, value: Option<&Value>) {
        let Some(rt) = self.inner.rt.upgrade() else {
            return;
        };
        if rt.context().track(dep) {
            if let Some(value) = value {
                observer::depend_child(&rt, value);
            }
        }
    }

    fn notify(&self, dep: &Dep) {
        if let Some(rt) = self.inner.rt.upgrade() {
            dep.notify(&rt);
        }
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = match self.inner.fields.try_borrow() {
            Ok(fields) => fields.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.id)
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DerivationId;
    use serde_json::json;

    fn root(rt: &Runtime) -> ReactiveObject {
        rt.observe_object(json!({"a": 1, "b": "two", "nested": {"x": 1}})).unwrap()
    }

    #[test]
    fn get_and_set() {
        let rt = Runtime::new();
        let obj = root(&rt);
        assert_eq!(obj.get("a").unwrap(), Value::from(1));

        obj.set("a", 42).unwrap();
        assert_eq!(obj.get("a").unwrap(), Value::from(42));
    }

    #[test]
    fn undeclared_keys_are_rejected_by_set() {
        let rt = Runtime::new();
        let obj = root(&rt);
        assert!(matches!(
            obj.set("missing", 1),
            Err(ReactiveError::UnknownField(k)) if k == "missing"
        ));
        assert!(matches!(obj.get("missing"), Err(ReactiveError::UnknownField(_))));
    }

    #[test]
    fn read_inside_frame_subscribes() {
        let rt = Runtime::new();
        let obj = root(&rt);
        let me = DerivationId::from_parts(99, 0);

        {
            let _guard = rt.context().enter(me);
            obj.get("a").unwrap();
            obj.get("a").unwrap();
        }

        let dep = obj.field_dep("a").unwrap();
        assert!(dep.has_subscriber(me));
        assert_eq!(dep.subscriber_count(), 1);
        assert!(!obj.field_dep("b").unwrap().has_subscriber(me));
    }

    #[test]
    fn reading_a_container_field_subscribes_to_its_structure() {
        let rt = Runtime::new();
        let obj = root(&rt);
        let me = DerivationId::from_parts(98, 0);

        let nested = {
            let _guard = rt.context().enter(me);
            obj.get("nested").unwrap()
        };
        assert!(nested.as_object().unwrap().dep().has_subscriber(me));
    }

    #[test]
    fn update_applies_function() {
        let rt = Runtime::new();
        let obj = root(&rt);
        obj.update("a", |v| v.as_f64().unwrap_or(0.0) + 5.0).unwrap();
        assert_eq!(obj.get_untracked("a"), Some(Value::from(6)));
    }

    #[test]
    fn insert_and_remove_keys() {
        let rt = Runtime::new();
        let obj = root(&rt);

        assert_eq!(obj.insert("c", true), None);
        assert_eq!(obj.keys(), vec!["a", "b", "nested", "c"]);
        assert_eq!(obj.insert("c", false), Some(Value::from(true)));
        assert_eq!(obj.get("c").unwrap(), Value::from(false));

        assert_eq!(obj.remove("a"), Some(Value::from(1)));
        assert_eq!(obj.remove("a"), None);
        assert_eq!(obj.len(), 3);
        assert!(!obj.contains_key("a"));
    }

    #[test]
    fn insert_on_declared_key_writes_through() {
        use crate::reactive::Watcher;

        let rt = Runtime::new();
        let obj = root(&rt);
        let source = obj.clone();
        let field_reader = Watcher::effect(&rt, move || {
            let _ = source.get("a");
        });
        let source = obj.clone();
        let key_reader = Watcher::effect(&rt, move || {
            let _ = source.keys();
        });

        assert_eq!(obj.insert("a", 1), Some(Value::from(1)));
        assert_eq!(field_reader.run_count(), 1);

        assert_eq!(obj.insert("a", 2), Some(Value::from(1)));
        assert_eq!(field_reader.run_count(), 2);
        assert_eq!(key_reader.run_count(), 1);
    }

    #[test]
    fn plain_writes_are_observed() {
        let rt = Runtime::new();
        let obj = root(&rt);
        obj.set("nested", json!({"y": [1, {"z": 2}]})).unwrap();

        assert_eq!(obj.get_path("nested.y.1.z").unwrap(), Value::from(2));
        assert!(obj.get("nested").unwrap().as_object().is_some());
    }

    #[test]
    fn clone_shares_state() {
        let rt = Runtime::new();
        let a = root(&rt);
        let b = a.clone();
        a.set("a", 100).unwrap();
        assert_eq!(b.get("a").unwrap(), Value::from(100));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn works_without_a_live_runtime() {
        let obj = {
            let rt = Runtime::new();
            root(&rt)
        };
        obj.set("a", 2).unwrap();
        assert_eq!(obj.get("a").unwrap(), Value::from(2));
    }
}
