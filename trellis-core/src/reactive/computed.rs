//! Computed Values
//!
//! A computed value is a cached derivation that re-evaluates only when it
//! is read after one of its dependencies changed.
//!
//! # How Computed Values Work
//!
//! 1. On first read, the getter runs inside a tracked evaluation and the
//!    result is cached. The computed is now `Fresh`.
//!
//! 2. While `Fresh`, reads return the cache without running the getter.
//!
//! 3. When a dependency notifies, the computed becomes `Dirty`, and so does
//!    every computed value reading it. Only then are the watchers reached
//!    this way updated, so none of them can read a stale cache. Dirtying is
//!    synchronous even when watcher scheduling is batched.
//!
//! 4. The next read re-evaluates, re-binding dependencies to exactly what
//!    the getter touched.
//!
//! # Failures
//!
//! A getter that returns an error (or panics) keeps the previous cache and
//! leaves the computed `Fresh`; the failure is reported to the runtime. A
//! dependency touched before the failure still marks it dirty later, which
//! is when the getter is retried. Reading a computed that has never
//! evaluated successfully yields [`ReactiveError::NoValue`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::error::{ReactiveError, Result};
use crate::graph::{Derivation, DerivationId, NodeKind};

use super::context;
use super::dep::{Dep, DepSet};
use super::runtime::{self, Runtime, WeakRuntime};

/// Cache state of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cache reflects the current dependencies.
    Fresh,

    /// A dependency changed since the last evaluation, or none has run yet.
    Dirty,
}

type Getter<T> = Box<dyn Fn() -> Result<T>>;

struct ComputedInner<T> {
    id: DerivationId,
    getter: Getter<T>,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    evaluating: Cell<bool>,
    active: Cell<bool>,
    deps: RefCell<DepSet>,
    /// Readers of this computed.
    dep: Dep,
    evaluations: Cell<usize>,
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn evaluate(&self, rt: &Runtime) {
        self.evaluating.set(true);
        self.evaluations.set(self.evaluations.get() + 1);
        let result = rt.run_tracked(self.id, &self.deps, || (self.getter)());
        self.evaluating.set(false);
        if !self.active.get() {
            // Torn down by its own getter.
            context::release(self.id, &self.deps.borrow());
        }
        self.dirty.set(false);
        match result {
            Ok(value) => {
                trace!(derivation = %self.id, "computed evaluated");
                *self.value.borrow_mut() = Some(value);
            }
            Err(err) => rt.report(&err),
        }
    }

    /// Evaluation without a tracking frame, for a computed that is torn
    /// down or whose runtime is gone. Reads attach to whatever frame is
    /// active.
    fn evaluate_detached(&self) -> Result<T> {
        self.evaluating.set(true);
        self.evaluations.set(self.evaluations.get() + 1);
        let result = runtime::catch_failure(|| (self.getter)());
        self.evaluating.set(false);
        match result {
            Ok(value) => {
                *self.value.borrow_mut() = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                let err = ReactiveError::evaluation(self.id, err);
                error!(error = %err, "detached computed failed");
                self.value.borrow().clone().ok_or(err)
            }
        }
    }
}

impl<T: Clone + 'static> Derivation for ComputedInner<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn invalidate(&self) -> Option<Dep> {
        if !self.active.get() || self.dirty.replace(true) {
            return None;
        }
        trace!(derivation = %self.id, "computed marked dirty");
        Some(self.dep.clone())
    }

    fn update(&self, rt: &Runtime) {
        if let Some(readers) = self.invalidate() {
            readers.notify(rt);
        }
    }

    fn run(&self, _rt: &Runtime) {}

    fn teardown(&self) {
        self.active.set(false);
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        context::release(self.id, &deps);
    }
}

/// A lazily evaluated, cached derivation.
///
/// Cloning a `Computed` creates a new handle to the same value.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trellis_core::{Computed, Runtime};
///
/// let rt = Runtime::new();
/// let user = rt.observe_object(json!({"first": "Ada", "last": "Lovelace"})).unwrap();
///
/// let source = user.clone();
/// let full = Computed::try_new(&rt, move || {
///     let first = source.get("first")?;
///     let last = source.get("last")?;
///     Ok(format!("{} {}", first.as_str().unwrap_or(""), last.as_str().unwrap_or("")))
/// });
///
/// assert_eq!(full.get().unwrap(), "Ada Lovelace");
/// user.set("last", "King").unwrap();
/// assert!(full.is_dirty());
/// assert_eq!(full.get().unwrap(), "Ada King");
/// ```
pub struct Computed<T> {
    rt: WeakRuntime,
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed from an infallible getter. Nothing runs until the
    /// first read.
    pub fn new<F>(rt: &Runtime, f: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(rt, Box::new(move || Ok(f())))
    }

    /// Create a computed from a fallible getter.
    pub fn try_new<F>(rt: &Runtime, f: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        Self::build(rt, Box::new(f))
    }

    fn build(rt: &Runtime, getter: Getter<T>) -> Self {
        let id = rt.reserve();
        let inner = Rc::new(ComputedInner {
            id,
            getter,
            value: RefCell::new(None),
            dirty: Cell::new(true),
            evaluating: Cell::new(false),
            active: Cell::new(true),
            deps: RefCell::new(DepSet::new()),
            dep: Dep::new(),
            evaluations: Cell::new(0),
        });
        rt.install(id, inner.clone());
        debug!(derivation = %id, "computed created");
        Self {
            rt: rt.downgrade(),
            inner,
        }
    }

    /// Read the value, evaluating first if dirty, and subscribe the active
    /// derivation to this computed.
    pub fn get(&self) -> Result<T> {
        let inner = &self.inner;
        if inner.evaluating.get() {
            return Err(ReactiveError::CircularComputed(inner.id));
        }
        let Some(rt) = self.rt.upgrade().filter(|_| inner.active.get()) else {
            return inner.evaluate_detached();
        };
        if inner.dirty.get() {
            inner.evaluate(&rt);
        }
        rt.context().track(&inner.dep);
        inner.value.borrow().clone().ok_or(ReactiveError::NoValue(inner.id))
    }

    /// The cached value, without evaluating or tracking.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    pub fn state(&self) -> ComputedState {
        if self.inner.dirty.get() {
            ComputedState::Dirty
        } else {
            ComputedState::Fresh
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// How many times the getter has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub fn is_subscribed_to(&self, dep: &Dep) -> bool {
        self.inner.deps.borrow().contains_key(&dep.id())
    }

    /// Registry notified when this computed becomes dirty.
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    pub fn id(&self) -> DerivationId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Unsubscribe from every dependency. Later reads still evaluate, but
    /// nothing is cached against changes.
    pub fn teardown(&self) -> bool {
        match self.rt.upgrade() {
            Some(rt) => rt.teardown(self.inner.id),
            None => {
                self.inner.teardown();
                false
            }
        }
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Computed");
        s.field("id", &self.inner.id).field("dirty", &self.inner.dirty.get());
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<evaluating>"),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ReactiveObject, Value};
    use serde_json::json;

    fn counter(rt: &Runtime) -> ReactiveObject {
        rt.observe_object(json!({"count": 1, "step": 10})).unwrap()
    }

    fn number(obj: &ReactiveObject, key: &str) -> Result<f64> {
        obj.get(key)?.as_f64().ok_or(ReactiveError::TypeMismatch {
            expected: "number",
            found: "other",
        })
    }

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::new();
        let obj = counter(&rt);
        let source = obj.clone();
        let doubled = Computed::try_new(&rt, move || Ok(number(&source, "count")? * 2.0));

        assert_eq!(doubled.state(), ComputedState::Dirty);
        assert_eq!(doubled.evaluation_count(), 0);

        assert_eq!(doubled.get().unwrap(), 2.0);
        assert_eq!(doubled.state(), ComputedState::Fresh);
        assert_eq!(doubled.evaluation_count(), 1);
    }

    #[test]
    fn computed_caches_until_dependency_changes() {
        let rt = Runtime::new();
        let obj = counter(&rt);
        let source = obj.clone();
        let doubled = Computed::try_new(&rt, move || Ok(number(&source, "count")? * 2.0));

        doubled.get().unwrap();
        doubled.get().unwrap();
        doubled.get().unwrap();
        assert_eq!(doubled.evaluation_count(), 1);

        obj.set("step", 11).unwrap();
        assert!(!doubled.is_dirty());

        obj.set("count", 5).unwrap();
        assert!(doubled.is_dirty());
        assert_eq!(doubled.get().unwrap(), 10.0);
        assert_eq!(doubled.evaluation_count(), 2);
    }

    #[test]
    fn dependencies_follow_the_last_evaluation() {
        let rt = Runtime::new();
        let obj = rt.observe_object(json!({"flag": true, "a": 1, "b": 2})).unwrap();
        let source = obj.clone();
        let pick = Computed::try_new(&rt, move || {
            let key = if source.get("flag")?.is_truthy() { "a" } else { "b" };
            source.get(key)
        });

        assert_eq!(pick.get().unwrap(), Value::from(1));
        let a = obj.field_dep("a").unwrap();
        let b = obj.field_dep("b").unwrap();
        assert!(pick.is_subscribed_to(&a));
        assert!(!pick.is_subscribed_to(&b));

        obj.set("flag", false).unwrap();
        assert_eq!(pick.get().unwrap(), Value::from(2));
        assert!(!pick.is_subscribed_to(&a));
        assert!(pick.is_subscribed_to(&b));
        assert!(!a.has_subscriber(pick.id()));
    }

    #[test]
    fn failure_keeps_previous_value() {
        let rt = Runtime::new();
        let obj = counter(&rt);
        let source = obj.clone();
        let checked = Computed::try_new(&rt, move || {
            let n = number(&source, "count")?;
            if n < 0.0 {
                return Err(ReactiveError::msg("negative"));
            }
            Ok(n)
        });

        assert_eq!(checked.get().unwrap(), 1.0);
        obj.set("count", -1).unwrap();
        assert_eq!(checked.get().unwrap(), 1.0);
        assert_eq!(checked.evaluation_count(), 2);

        // Still subscribed, so the next change retries.
        obj.set("count", 3).unwrap();
        assert_eq!(checked.get().unwrap(), 3.0);
    }

    #[test]
    fn never_evaluated_successfully_has_no_value() {
        let rt = Runtime::new();
        let failing: Computed<i32> = Computed::try_new(&rt, || Err(ReactiveError::msg("boom")));
        assert!(matches!(failing.get(), Err(ReactiveError::NoValue(id)) if id == failing.id()));
        assert!(!failing.has_value());
    }

    #[test]
    fn panicking_getter_is_contained() {
        let rt = Runtime::new();
        let failing: Computed<i32> = Computed::new(&rt, || panic!("bad getter"));
        assert!(failing.get().is_err());
        assert_eq!(rt.context().depth(), 0);
    }

    #[test]
    fn self_reference_is_reported_not_recursed() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let reader = slot.clone();
        let looping = Computed::try_new(&rt, move || match reader.borrow().as_ref() {
            Some(me) => me.get(),
            None => Ok(0),
        });
        *slot.borrow_mut() = Some(looping.clone());

        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        rt.set_error_handler(move |err| sink.borrow_mut().push(err.root_cause().to_string()));

        assert!(looping.get().is_err());
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].contains("read itself"));

        slot.borrow_mut().take();
    }

    #[test]
    fn chained_computed_values() {
        let rt = Runtime::new();
        let obj = counter(&rt);
        let source = obj.clone();
        let doubled = Computed::try_new(&rt, move || Ok(number(&source, "count")? * 2.0));
        let upstream = doubled.clone();
        let quadrupled = Computed::try_new(&rt, move || Ok(upstream.get()? * 2.0));

        assert_eq!(quadrupled.get().unwrap(), 4.0);
        assert!(doubled.dep().has_subscriber(quadrupled.id()));

        obj.set("count", 2).unwrap();
        assert!(doubled.is_dirty());
        assert!(quadrupled.is_dirty());
        assert_eq!(quadrupled.get().unwrap(), 8.0);
    }

    #[test]
    fn teardown_stops_tracking() {
        let rt = Runtime::new();
        let obj = counter(&rt);
        let source = obj.clone();
        let doubled = Computed::try_new(&rt, move || Ok(number(&source, "count")? * 2.0));
        doubled.get().unwrap();

        assert!(doubled.teardown());
        assert!(!doubled.is_active());
        assert_eq!(obj.field_dep("count").unwrap().subscriber_count(), 0);

        obj.set("count", 4).unwrap();
        assert_eq!(doubled.get().unwrap(), 8.0);
        assert_eq!(obj.field_dep("count").unwrap().subscriber_count(), 0);
    }
}
