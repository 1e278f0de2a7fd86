//! Observed arrays.
//!
//! Elements are not tracked individually. The array owns one registry;
//! every read subscribes to it and every mutation notifies it. Contents
//! change only through the methods below, so there is no index or length
//! assignment that could bypass tracking.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{ReactiveError, Result};

use super::dep::Dep;
use super::observer;
use super::runtime::{Runtime, WeakRuntime};
use super::value::{ContainerId, IntoValue, Value};

struct ArrayInner {
    id: ContainerId,
    rt: WeakRuntime,
    items: RefCell<Vec<Value>>,
    dep: Dep,
}

/// An observed array.
///
/// Cloning a `ReactiveArray` creates a new handle to the same array.
#[derive(Clone)]
pub struct ReactiveArray {
    inner: Rc<ArrayInner>,
}

impl ReactiveArray {
    pub fn new(rt: &Runtime) -> Self {
        Self::from_items(&rt.downgrade(), Vec::new())
    }

    pub(crate) fn from_items(rt: &WeakRuntime, items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                id: ContainerId::new(),
                rt: rt.clone(),
                items: RefCell::new(items),
                dep: Dep::new(),
            }),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &ReactiveArray) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The contents registry.
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, index: usize) -> Option<Value> {
        let item = self.inner.items.borrow().get(index).cloned();
        self.track(item.as_ref());
        item
    }

    pub fn len(&self) -> usize {
        self.track(None);
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the contents, subscribing to the array and to the structure
    /// of nested containers.
    pub fn to_vec(&self) -> Vec<Value> {
        let items = self.items_untracked();
        if let Some(rt) = self.inner.rt.upgrade() {
            if rt.context().track(&self.inner.dep) {
                observer::depend_array(&rt, &items);
            }
        }
        items
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Array(self.clone()).to_json()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Append an element. Returns the new length.
    pub fn push(&self, value: impl IntoValue) -> usize {
        let value = value.into_value(&self.inner.rt);
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.push(value);
            items.len()
        };
        self.changed("push");
        len
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.items.borrow_mut().pop()?;
        self.changed("pop");
        Some(popped)
    }

    /// Remove the first element.
    pub fn shift(&self) -> Option<Value> {
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                return None;
            }
            items.remove(0)
        };
        self.changed("shift");
        Some(shifted)
    }

    /// Prepend an element. Returns the new length.
    pub fn unshift(&self, value: impl IntoValue) -> usize {
        let value = value.into_value(&self.inner.rt);
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.insert(0, value);
            items.len()
        };
        self.changed("unshift");
        len
    }

    pub fn insert(&self, index: usize, value: impl IntoValue) -> Result<()> {
        let value = value.into_value(&self.inner.rt);
        {
            let mut items = self.inner.items.borrow_mut();
            if index > items.len() {
                return Err(ReactiveError::IndexOutOfBounds { index, len: items.len() });
            }
            items.insert(index, value);
        }
        self.changed("insert");
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return Err(ReactiveError::IndexOutOfBounds { index, len: items.len() });
            }
            items.remove(index)
        };
        self.changed("remove");
        Ok(removed)
    }

    /// Replace the element at `index`. Writing an identical value does
    /// nothing.
    pub fn set(&self, index: usize, value: impl IntoValue) -> Result<()> {
        let value = value.into_value(&self.inner.rt);
        {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(ReactiveError::IndexOutOfBounds { index, len })?;
            if slot.same_value(&value) {
                return Ok(());
            }
            *slot = value;
        }
        self.changed("set");
        Ok(())
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `items` in their place. `start` and `delete_count` are clamped to the
    /// array. Returns the removed elements.
    pub fn splice<I, V>(&self, start: usize, delete_count: usize, items: I) -> Vec<Value>
    where
        I: IntoIterator<Item = V>,
        V: IntoValue,
    {
        let inserted: Vec<Value> = items
            .into_iter()
            .map(|v| v.into_value(&self.inner.rt))
            .collect();
        let removed: Vec<Value> = {
            let mut current = self.inner.items.borrow_mut();
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            current.splice(start..end, inserted).collect()
        };
        self.changed("splice");
        removed
    }

    /// Sort in place. The comparator runs with the array unborrowed, so it
    /// may read other reactive state.
    /// Sort with `compare`. The comparator works on a copy, so it may read
    /// this array, and a panic in it leaves the contents untouched.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut items = self.inner.items.borrow().clone();
        items.sort_by(|a, b| compare(a, b));
        *self.inner.items.borrow_mut() = items;
        self.changed("sort");
    }

    pub fn reverse(&self) {
        self.inner.items.borrow_mut().reverse();
        self.changed("reverse");
    }

    /// Keep only the elements matching `keep`. Like
    /// [`sort_by`](Self::sort_by), the predicate works on a copy.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&Value) -> bool,
    {
        let mut items = self.inner.items.borrow().clone();
        let before = items.len();
        items.retain(|item| keep(item));
        let changed = items.len() != before;
        *self.inner.items.borrow_mut() = items;
        if changed {
            self.changed("retain");
        }
    }

    pub fn clear(&self) {
        let was_empty = {
            let mut items = self.inner.items.borrow_mut();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if !was_empty {
            self.changed("clear");
        }
    }

    fn track(&self, item: Option<&Value>) {
        let Some(rt) = self.inner.rt.upgrade() else {
            return;
        };
        if rt.context().track(&self.inner.dep) {
            if let Some(item) = item {
                observer::depend_child(&rt, item);
            }
        }
    }

    fn changed(&self, method: &'static str) {
        trace!(array = ?self.inner.id, method, "array mutation");
        if let Some(rt) = self.inner.rt.upgrade() {
            self.inner.dep.notify(&rt);
        }
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.items.try_borrow().map(|items| items.len()).unwrap_or(0);
        f.debug_struct("ReactiveArray")
            .field("id", &self.inner.id)
            .field("len", &len)
            .finish()
    }
}
