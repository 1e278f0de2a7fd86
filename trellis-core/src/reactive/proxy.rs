//! Proxy objects.
//!
//! A [`ProxyObject`] is a consumer-facing view assembled from two kinds of
//! properties:
//!
//! - forwarding properties, which read and write a field of some observed
//!   object ([`define_proxy`](ProxyObject::define_proxy)). They have no
//!   tracking logic of their own; the underlying field does the tracking.
//! - computed properties, backed by a [`Computed<Value>`] whose getter
//!   receives the proxy itself ([`define_computed`](ProxyObject::define_computed)).
//!
//! Computed getters see the proxy through a weak handle, so a proxy that
//! owns computed properties reading its own fields is not a reference cycle.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{ReactiveError, Result};

use super::computed::Computed;
use super::object::ReactiveObject;
use super::observer::{self, PathSource};
use super::runtime::{Runtime, WeakRuntime};
use super::value::{IntoValue, Value};

type Setter = Rc<dyn Fn(&ProxyObject, Value) -> Result<()>>;

#[derive(Clone)]
enum Property {
    Forward {
        source: ReactiveObject,
        key: String,
    },
    Computed {
        computed: Computed<Value>,
        rt: WeakRuntime,
        setter: Option<Setter>,
    },
}

type Properties = RefCell<IndexMap<String, Property>>;

/// A view over observed data plus computed properties.
///
/// Cloning a `ProxyObject` creates a new handle to the same view.
#[derive(Clone, Default)]
pub struct ProxyObject {
    props: Rc<Properties>,
}

impl ProxyObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `source[key]` as `self[key]`.
    pub fn define_proxy(&self, source: &ReactiveObject, key: impl Into<String>) {
        let key = key.into();
        let property = Property::Forward {
            source: source.clone(),
            key: key.clone(),
        };
        self.props.borrow_mut().insert(key, property);
    }

    /// Forward every key `source` has right now.
    pub fn proxy_all(&self, source: &ReactiveObject) {
        for (key, _) in source.entries_untracked() {
            self.define_proxy(source, key);
        }
    }

    /// Install a read-only computed property.
    pub fn define_computed<G>(
        &self,
        rt: &Runtime,
        key: impl Into<String>,
        getter: G,
    ) -> Computed<Value>
    where
        G: Fn(&ProxyObject) -> Result<Value> + 'static,
    {
        self.install_computed(rt, key.into(), getter, None)
    }

    /// Install a computed property whose writes are passed to `setter`.
    pub fn define_computed_with_setter<G, S>(
        &self,
        rt: &Runtime,
        key: impl Into<String>,
        getter: G,
        setter: S,
    ) -> Computed<Value>
    where
        G: Fn(&ProxyObject) -> Result<Value> + 'static,
        S: Fn(&ProxyObject, Value) -> Result<()> + 'static,
    {
        self.install_computed(rt, key.into(), getter, Some(Rc::new(setter)))
    }

    fn install_computed<G>(
        &self,
        rt: &Runtime,
        key: String,
        getter: G,
        setter: Option<Setter>,
    ) -> Computed<Value>
    where
        G: Fn(&ProxyObject) -> Result<Value> + 'static,
    {
        let this = Rc::downgrade(&self.props);
        let name = key.clone();
        let computed = Computed::try_new(rt, move || {
            let props = upgrade(&this, &name)?;
            getter(&ProxyObject { props })
        });
        debug!(key = %key, derivation = %computed.id(), "computed property defined");
        let property = Property::Computed {
            computed: computed.clone(),
            rt: rt.downgrade(),
            setter,
        };
        self.props.borrow_mut().insert(key, property);
        computed
    }

    fn property(&self, key: &str) -> Result<Property> {
        self.props
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| ReactiveError::UnknownField(key.to_string()))
    }

    /// Read a property. Forwarding properties track the underlying field;
    /// computed properties track the computed.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self.property(key)? {
            Property::Forward { source, key } => source.get(&key),
            Property::Computed { computed, .. } => computed.get(),
        }
    }

    /// Write a property. Computed properties without a setter are read-only.
    pub fn set(&self, key: &str, value: impl IntoValue) -> Result<()> {
        match self.property(key)? {
            Property::Forward { source, key } => source.set(&key, value),
            Property::Computed { setter: None, .. } => {
                Err(ReactiveError::ReadOnly(key.to_string()))
            }
            Property::Computed {
                rt,
                setter: Some(setter),
                ..
            } => setter(self, value.into_value(&rt)),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.props.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }

    /// The computed behind a property, if it is one.
    pub fn computed(&self, key: &str) -> Option<Computed<Value>> {
        match self.props.borrow().get(key)? {
            Property::Computed { computed, .. } => Some(computed.clone()),
            Property::Forward { .. } => None,
        }
    }

    /// Tracked dotted-path read. The first segment names a property.
    pub fn get_path(&self, path: &str) -> Result<Value> {
        let segments = observer::parse_path(path)?;
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| ReactiveError::InvalidPath(path.to_string()))?;
        let root = self.get(first).map_err(|err| match err {
            ReactiveError::UnknownField(segment) => ReactiveError::PathNotFound {
                path: path.to_string(),
                segment,
            },
            other => other,
        })?;
        observer::resolve_segments(root, path, rest)
    }

    /// Untracked snapshot of every property that currently has a value.
    pub fn to_json(&self) -> serde_json::Value {
        let keys = self.keys();
        let map = keys
            .into_iter()
            .filter_map(|key| {
                let value = match self.property(&key).ok()? {
                    Property::Forward { source, key } => source.get_untracked(&key)?,
                    Property::Computed { computed, .. } => computed.peek()?,
                };
                Some((key, value.to_json()))
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

fn upgrade(props: &Weak<Properties>, key: &str) -> Result<Rc<Properties>> {
    props
        .upgrade()
        .ok_or_else(|| ReactiveError::msg(format!("proxy owning computed `{key}` was dropped")))
}

impl PathSource for ProxyObject {
    fn resolve(&self, path: &str) -> Result<Value> {
        self.get_path(path)
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = match self.props.try_borrow() {
            Ok(props) => props.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("ProxyObject").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{WatchOptions, Watcher};
    use serde_json::json;

    fn number(vm: &ProxyObject, key: &str) -> Result<f64> {
        Ok(vm.get(key)?.as_f64().unwrap_or_default())
    }

    fn instance(rt: &Runtime) -> (ReactiveObject, ProxyObject) {
        let data = rt.observe_object(json!({"a": 1, "b": 2})).unwrap();
        let vm = ProxyObject::new();
        vm.proxy_all(&data);
        (data, vm)
    }

    #[test]
    fn forwarding_reads_and_writes_the_source() {
        let rt = Runtime::new();
        let (data, vm) = instance(&rt);

        assert_eq!(vm.get("a").unwrap(), Value::from(1));
        vm.set("a", 10).unwrap();
        assert_eq!(data.get("a").unwrap(), Value::from(10));
        assert_eq!(vm.keys(), vec!["a", "b"]);
        assert!(matches!(vm.get("zzz"), Err(ReactiveError::UnknownField(_))));
    }

    #[test]
    fn computed_property_reads_through_the_proxy() {
        let rt = Runtime::new();
        let (data, vm) = instance(&rt);
        let sum = vm.define_computed(&rt, "sum", |vm| {
            Ok(Value::from(number(vm, "a")? + number(vm, "b")?))
        });

        assert_eq!(vm.get("sum").unwrap(), Value::from(3));
        assert_eq!(sum.evaluation_count(), 1);

        data.set("b", 5).unwrap();
        assert!(sum.is_dirty());
        assert_eq!(vm.get("sum").unwrap(), Value::from(6));
    }

    #[test]
    fn computed_without_setter_is_read_only() {
        let rt = Runtime::new();
        let (_data, vm) = instance(&rt);
        vm.define_computed(&rt, "twice", |vm| Ok(Value::from(number(vm, "a")? * 2.0)));
        assert!(matches!(vm.set("twice", 4), Err(ReactiveError::ReadOnly(k)) if k == "twice"));
    }

    #[test]
    fn computed_setter_writes_back() {
        let rt = Runtime::new();
        let (data, vm) = instance(&rt);
        vm.define_computed_with_setter(
            &rt,
            "twice",
            |vm| Ok(Value::from(number(vm, "a")? * 2.0)),
            |vm, value| vm.set("a", value.as_f64().unwrap_or_default() / 2.0),
        );

        vm.set("twice", 8).unwrap();
        assert_eq!(data.get("a").unwrap(), Value::from(4));
        assert_eq!(vm.get("twice").unwrap(), Value::from(8));
    }

    #[test]
    fn path_watch_on_a_proxy() {
        let rt = Runtime::new();
        let data = rt.observe_object(json!({"user": {"name": "ada"}})).unwrap();
        let vm = ProxyObject::new();
        vm.proxy_all(&data);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        Watcher::path(
            &rt,
            vm.clone(),
            "user.name",
            move |new, old| {
                sink.borrow_mut().push((new.clone(), old.cloned()));
                Ok(())
            },
            WatchOptions::default(),
        )
        .unwrap();

        data.get_path("user").unwrap().as_object().unwrap().set("name", "grace").unwrap();
        assert_eq!(*seen.borrow(), vec![(Value::from("grace"), Some(Value::from("ada")))]);
        assert!(matches!(vm.get_path("nobody.name"), Err(ReactiveError::PathNotFound { .. })));
    }

    #[test]
    fn dropped_proxy_does_not_leak_through_its_computed() {
        let rt = Runtime::new();
        let (_data, vm) = instance(&rt);
        let sum = vm.define_computed(&rt, "sum", |vm| {
            Ok(Value::from(number(vm, "a")? + number(vm, "b")?))
        });
        drop(vm);
        assert!(sum.get().is_err());
    }

    #[test]
    fn snapshot_includes_evaluated_computeds() {
        let rt = Runtime::new();
        let (_data, vm) = instance(&rt);
        vm.define_computed(&rt, "sum", |vm| Ok(Value::from(number(vm, "a")? + number(vm, "b")?)));
        assert_eq!(vm.to_json(), json!({"a": 1, "b": 2}));
        vm.get("sum").unwrap();
        assert_eq!(vm.to_json(), json!({"a": 1, "b": 2, "sum": 3}));
    }
}
