//! Watchers
//!
//! A watcher evaluates a getter and invokes a callback whenever the getter's
//! result changes.
//!
//! # How Watchers Work
//!
//! 1. On creation, the getter runs inside a tracked evaluation. The result
//!    becomes the stored value; the callback is not invoked unless
//!    [`WatchOptions::immediate`] is set.
//!
//! 2. When a dependency notifies, the watcher re-runs: synchronously inside
//!    the write, or queued for [`Runtime::flush`] when scheduling is batched
//!    (unless the watcher asked for [`WatchOptions::sync`]).
//!
//! 3. Each run re-binds dependencies to what the getter touched. If the new
//!    value differs from the stored one (or the watcher is deep), the new
//!    value is stored first and then the callback receives `(new, old)`.
//!    Values are compared with [`WatchValue::same_as`], so NaN results do
//!    not count as changes.
//!
//! 4. A deep watcher also calls [`WatchValue::track_deep`] on each result
//!    while still tracking, which subscribes it to every container
//!    reachable from a [`Value`].
//!
//! # Failures
//!
//! Getter and callback failures, including panics, are caught and reported
//! through [`Runtime::report`]. A failed getter changes nothing: the stored
//! value is kept and the callback is not invoked.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::{ReactiveError, Result};
use crate::graph::{Derivation, DerivationId, NodeKind};

use super::context;
use super::dep::{Dep, DepSet};
use super::observer::{self, PathSource};
use super::runtime::{self, Runtime, WeakRuntime};
use super::value::Value;

/// Options accepted by watcher constructors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Invoke the callback on every run, even if the value compares equal,
    /// and subscribe to every container reachable from the result.
    pub deep: bool,

    /// Invoke the callback once on creation with no old value.
    pub immediate: bool,

    /// Re-run inside the notifying write even when scheduling is batched.
    pub sync: bool,
}

impl WatchOptions {
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn sync() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    pub fn with_deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn with_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// A result a watcher can store and compare.
///
/// Implemented for primitives, strings, [`Value`], and `Option`, `Vec` and
/// tuples of these. Other types opt in with an empty
/// `impl WatchValue for MyType {}`, which compares with `PartialEq`.
pub trait WatchValue: Clone + PartialEq + 'static {
    /// Whether a new result counts as unchanged. NaN equals NaN.
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }

    /// Read every reactive container reachable from this result.
    fn track_deep(&self) {}
}

macro_rules! watch_value_plain {
    ($($ty:ty),* $(,)?) => {
        $(impl WatchValue for $ty {})*
    };
}

watch_value_plain!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    String,
    &'static str,
    Rc<str>,
    serde_json::Value,
);

impl WatchValue for f64 {
    fn same_as(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl WatchValue for f32 {
    fn same_as(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl WatchValue for Value {
    fn track_deep(&self) {
        observer::traverse(self);
    }
}

impl<T: WatchValue> WatchValue for Option<T> {
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_as(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn track_deep(&self) {
        if let Some(value) = self {
            value.track_deep();
        }
    }
}

impl<T: WatchValue> WatchValue for Vec<T> {
    fn same_as(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_as(b))
    }

    fn track_deep(&self) {
        self.iter().for_each(T::track_deep);
    }
}

macro_rules! watch_value_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: WatchValue),+> WatchValue for ($($name,)+) {
            fn same_as(&self, other: &Self) -> bool {
                $(self.$idx.same_as(&other.$idx))&&+
            }

            fn track_deep(&self) {
                $(self.$idx.track_deep();)+
            }
        }
    };
}

watch_value_tuple!(A 0);
watch_value_tuple!(A 0, B 1);
watch_value_tuple!(A 0, B 1, C 2);
watch_value_tuple!(A 0, B 1, C 2, D 3);

type Getter<T> = Box<dyn Fn() -> Result<T>>;
type Callback<T> = Box<dyn Fn(&T, Option<&T>) -> Result<()>>;

struct WatcherInner<T> {
    id: DerivationId,
    getter: Getter<T>,
    callback: Option<Callback<T>>,
    options: WatchOptions,
    /// `None` until the getter succeeds once.
    value: RefCell<Option<T>>,
    deps: RefCell<DepSet>,
    active: Cell<bool>,
    runs: Cell<usize>,
    /// Nesting of synchronous runs, for loop detection.
    depth: Cell<u32>,
}

impl<T: WatchValue> WatcherInner<T> {
    fn evaluate(&self, rt: &Runtime) -> Option<T> {
        self.runs.set(self.runs.get() + 1);
        let deep = self.options.deep;
        let result = rt.run_tracked(self.id, &self.deps, || {
            let value = (self.getter)()?;
            if deep {
                value.track_deep();
            }
            Ok(value)
        });
        if !self.active.get() {
            // Torn down during its own run.
            context::release(self.id, &self.deps.borrow());
        }
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                rt.report(&err);
                None
            }
        }
    }

    fn start(&self, rt: &Runtime) {
        let Some(value) = self.evaluate(rt) else {
            return;
        };
        *self.value.borrow_mut() = Some(value.clone());
        if self.options.immediate {
            self.invoke(rt, &value, None);
        }
    }

    fn rerun(&self, rt: &Runtime) {
        if !self.active.get() {
            return;
        }
        let depth = self.depth.get();
        let limit = rt.config().max_update_count;
        if depth >= limit {
            let err = ReactiveError::CircularUpdate {
                derivation: self.id,
                limit,
            };
            warn!(derivation = %self.id, limit, "possible infinite update loop");
            rt.report(&err);
            return;
        }
        self.depth.set(depth + 1);
        if let Some(new) = self.evaluate(rt) {
            let changed = self.options.deep
                || !self.value.borrow().as_ref().is_some_and(|old| old.same_as(&new));
            if changed {
                let old = self.value.replace(Some(new.clone()));
                trace!(derivation = %self.id, "watched value changed");
                self.invoke(rt, &new, old.as_ref());
            }
        }
        self.depth.set(depth);
    }

    fn invoke(&self, rt: &Runtime, new: &T, old: Option<&T>) {
        let Some(callback) = &self.callback else {
            return;
        };
        let _untracked = rt.context().enter_untracked();
        if let Err(err) = runtime::catch_failure(|| callback(new, old)) {
            rt.report(&ReactiveError::callback(self.id, err));
        }
    }
}

impl<T: WatchValue> Derivation for WatcherInner<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Watcher
    }

    fn update(&self, rt: &Runtime) {
        if !self.active.get() {
            return;
        }
        if self.options.sync || !rt.is_batched() {
            self.rerun(rt);
        } else {
            rt.enqueue(self.id);
        }
    }

    fn run(&self, rt: &Runtime) {
        self.rerun(rt);
    }

    fn teardown(&self) {
        self.active.set(false);
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        context::release(self.id, &deps);
    }
}

/// An eager derivation that reports changes of its getter's value.
///
/// Dropping the handle does not stop the watcher; call
/// [`teardown`](Self::teardown) or create it through a [`Scope`](super::Scope).
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use serde_json::json;
/// use trellis_core::{Runtime, Watcher};
///
/// let rt = Runtime::new();
/// let state = rt.observe_object(json!({"count": 0})).unwrap();
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let source = state.clone();
/// let log = seen.clone();
/// let _watcher = Watcher::new(
///     &rt,
///     move || source.get("count").ok().and_then(|v| v.as_i64()),
///     move |new, old| log.borrow_mut().push((*new, old.copied().flatten())),
/// );
///
/// state.set("count", 1).unwrap();
/// assert_eq!(*seen.borrow(), vec![(Some(1), Some(0))]);
/// ```
pub struct Watcher<T> {
    rt: WeakRuntime,
    inner: Rc<WatcherInner<T>>,
}

impl<T: WatchValue> Watcher<T> {
    /// Watch an infallible getter with default options.
    pub fn new<G, C>(rt: &Runtime, getter: G, callback: C) -> Self
    where
        G: Fn() -> T + 'static,
        C: Fn(&T, Option<&T>) + 'static,
    {
        Self::build(
            rt,
            Box::new(move || Ok(getter())),
            Some(Box::new(move |new: &T, old: Option<&T>| {
                callback(new, old);
                Ok(())
            })),
            WatchOptions::default(),
        )
    }

    /// Watch a fallible getter with a fallible callback.
    pub fn try_new<G, C>(rt: &Runtime, getter: G, callback: C, options: WatchOptions) -> Self
    where
        G: Fn() -> Result<T> + 'static,
        C: Fn(&T, Option<&T>) -> Result<()> + 'static,
    {
        Self::build(rt, Box::new(getter), Some(Box::new(callback)), options)
    }

    fn build(
        rt: &Runtime,
        getter: Getter<T>,
        callback: Option<Callback<T>>,
        options: WatchOptions,
    ) -> Self {
        let id = rt.reserve();
        let inner = Rc::new(WatcherInner {
            id,
            getter,
            callback,
            options,
            value: RefCell::new(None),
            deps: RefCell::new(DepSet::new()),
            active: Cell::new(true),
            runs: Cell::new(0),
            depth: Cell::new(0),
        });
        rt.install(id, inner.clone());
        debug!(derivation = %id, ?options, "watcher created");
        inner.start(rt);
        Self {
            rt: rt.downgrade(),
            inner,
        }
    }

    pub fn id(&self) -> DerivationId {
        self.inner.id
    }

    /// The stored value, or `None` if the getter has never succeeded.
    pub fn value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    pub fn options(&self) -> WatchOptions {
        self.inner.options
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Number of times the getter has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub fn is_subscribed_to(&self, dep: &Dep) -> bool {
        self.inner.deps.borrow().contains_key(&dep.id())
    }

    /// Stop the watcher and unsubscribe it everywhere. Safe to call from
    /// inside its own getter or callback.
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

impl Watcher<()> {
    /// A watcher without a callback that runs `f` for its side effects
    /// whenever anything it read changes.
    pub fn effect<F>(rt: &Runtime, f: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::build(
            rt,
            Box::new(move || {
                f();
                Ok(())
            }),
            None,
            WatchOptions::default(),
        )
    }
}

impl Watcher<Value> {
    /// Watch a dotted path such as `"user.tags.0"` on `source`.
    ///
    /// The path is checked up front; a path that does not resolve yet is
    /// reported and leaves the watcher without a value until it does.
    pub fn path<S, C>(
        rt: &Runtime,
        source: S,
        path: &str,
        callback: C,
        options: WatchOptions,
    ) -> Result<Self>
    where
        S: PathSource + 'static,
        C: Fn(&Value, Option<&Value>) -> Result<()> + 'static,
    {
        observer::parse_path(path)?;
        let path = path.to_string();
        let getter = move || -> Result<Value> { source.resolve(&path) };
        Ok(Self::build(rt, Box::new(getter), Some(Box::new(callback)), options))
    }
}

impl<T> Clone for Watcher<T> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Watcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Watcher");
        s.field("id", &self.inner.id)
            .field("active", &self.inner.active.get())
            .field("runs", &self.inner.runs.get());
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<updating>"),
        };
        s.finish()
    }
}
