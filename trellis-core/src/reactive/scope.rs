//! Owner scopes.
//!
//! A [`Scope`] creates derivations and remembers their ids. Disposing the
//! scope (explicitly or by dropping it) tears all of them down, which is the
//! usual way to stop a group of watchers that belong to one consumer.

use std::cell::{Cell, RefCell};

use tracing::debug;

use crate::error::Result;
use crate::graph::DerivationId;

use super::computed::Computed;
use super::observer::PathSource;
use super::runtime::Runtime;
use super::value::Value;
use super::watcher::{WatchOptions, WatchValue, Watcher};

pub struct Scope {
    rt: Runtime,
    owned: RefCell<Vec<DerivationId>>,
    disposed: Cell<bool>,
}

impl Scope {
    pub fn new(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            owned: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }

    pub fn watch<T, G, C>(&self, getter: G, callback: C) -> Watcher<T>
    where
        T: WatchValue,
        G: Fn() -> T + 'static,
        C: Fn(&T, Option<&T>) + 'static,
    {
        let watcher = Watcher::new(&self.rt, getter, callback);
        self.adopt(watcher.id());
        watcher
    }

    pub fn try_watch<T, G, C>(&self, getter: G, callback: C, options: WatchOptions) -> Watcher<T>
    where
        T: WatchValue,
        G: Fn() -> Result<T> + 'static,
        C: Fn(&T, Option<&T>) -> Result<()> + 'static,
    {
        let watcher = Watcher::try_new(&self.rt, getter, callback, options);
        self.adopt(watcher.id());
        watcher
    }

    pub fn watch_path<S, C>(
        &self,
        source: S,
        path: &str,
        callback: C,
        options: WatchOptions,
    ) -> Result<Watcher<Value>>
    where
        S: PathSource + 'static,
        C: Fn(&Value, Option<&Value>) -> Result<()> + 'static,
    {
        let watcher = Watcher::path(&self.rt, source, path, callback, options)?;
        self.adopt(watcher.id());
        Ok(watcher)
    }

    pub fn effect<F>(&self, f: F) -> Watcher<()>
    where
        F: Fn() + 'static,
    {
        let watcher = Watcher::effect(&self.rt, f);
        self.adopt(watcher.id());
        watcher
    }

    pub fn computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        let computed = Computed::new(&self.rt, f);
        self.adopt(computed.id());
        computed
    }

    pub fn try_computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        let computed = Computed::try_new(&self.rt, f);
        self.adopt(computed.id());
        computed
    }

    /// Take ownership of a derivation created elsewhere. A disposed scope
    /// tears it down at once.
    pub fn adopt(&self, id: DerivationId) {
        if self.disposed.get() {
            self.rt.teardown(id);
        } else {
            self.owned.borrow_mut().push(id);
        }
    }

    /// Number of derivations owned and not yet disposed.
    pub fn len(&self) -> usize {
        self.owned.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Tear down every owned derivation. Returns how many were still alive.
    pub fn dispose(&self) -> usize {
        self.disposed.set(true);
        let owned = std::mem::take(&mut *self.owned.borrow_mut());
        let count = owned.iter().filter(|id| self.rt.teardown(**id)).count();
        if count > 0 {
            debug!(count, "scope disposed");
        }
        count
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}
