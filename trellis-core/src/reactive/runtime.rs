//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observed data,
//! computed values and watchers. It owns the derivation context, the arena
//! of live derivations and the update scheduler.
//!
//! # How It Works
//!
//! 1. Watchers and computed values register in the arena and receive a
//!    [`DerivationId`].
//!
//! 2. While a derivation evaluates, the context attributes every field read
//!    to it, and the field's registry records the id.
//!
//! 3. When a field is written, its registry notifies each recorded id. The
//!    runtime resolves the id in the arena and:
//!    a. marks computed values dirty (always synchronously),
//!    b. re-runs watchers, or queues them when scheduling is batched.
//!
//! # Ownership
//!
//! Data containers and derivation handles keep a [`WeakRuntime`]. The arena
//! owns the derivations, and closures inside derivations typically capture
//! containers, so a strong back-reference would keep everything alive
//! forever. Once the last [`Runtime`] handle is dropped, reads stop tracking
//! and writes stop notifying.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, error, trace, warn};

use crate::config::{RuntimeConfig, Scheduling};
use crate::error::{ReactiveError, Result};
use crate::graph::{Derivation, DerivationArena, DerivationId, NodeKind, UpdateScheduler};

use super::computed::Computed;
use super::context::{self, DerivationContext};
use super::dep::DepSet;
use super::object::ReactiveObject;
use super::observer;
use super::scope::Scope;
use super::value::Value;
use super::watcher::{WatchValue, Watcher};

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

struct RuntimeInner {
    config: RuntimeConfig,
    context: DerivationContext,
    arena: RefCell<DerivationArena>,
    scheduler: RefCell<UpdateScheduler>,
    error_handler: RefCell<Option<ErrorHandler>>,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let drained = self.arena.get_mut().drain();
        for (_, derivation) in drained {
            derivation.teardown();
        }
    }
}

/// Handle to a reactive runtime.
///
/// Cloning a `Runtime` creates a new handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning handle to a runtime.
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(?config, "reactive runtime created");
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                context: DerivationContext::new(),
                arena: RefCell::new(DerivationArena::new()),
                scheduler: RefCell::new(UpdateScheduler::new()),
                error_handler: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &DerivationContext {
        &self.inner.context
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Observe plain data. Objects and arrays (recursively) become reactive
    /// containers bound to this runtime; primitives are returned as values.
    pub fn observe(&self, data: Json) -> Value {
        observer::observe_json(&self.downgrade(), data)
    }

    /// Observe plain data that must be an object.
    pub fn observe_object(&self, data: Json) -> Result<ReactiveObject> {
        match self.observe(data) {
            Value::Object(object) => Ok(object),
            other => Err(ReactiveError::TypeMismatch {
                expected: "object",
                found: other.kind(),
            }),
        }
    }

    /// Observe any serializable value.
    pub fn observe_serialize<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value> {
        let json = serde_json::to_value(data)
            .map_err(|e| ReactiveError::msg(format!("cannot observe value: {e}")))?;
        Ok(self.observe(json))
    }

    // ------------------------------------------------------------------
    // Derivation helpers
    // ------------------------------------------------------------------

    /// Shorthand for [`Watcher::new`].
    pub fn watch<T, G, C>(&self, getter: G, callback: C) -> Watcher<T>
    where
        T: WatchValue,
        G: Fn() -> T + 'static,
        C: Fn(&T, Option<&T>) + 'static,
    {
        Watcher::new(self, getter, callback)
    }

    /// Shorthand for [`Computed::new`].
    pub fn computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new(self, f)
    }

    /// Create an owner scope for derivations.
    pub fn scope(&self) -> Scope {
        Scope::new(self)
    }

    /// Run `f` with tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.context().enter_untracked();
        f()
    }

    pub fn derivation_count(&self) -> usize {
        self.inner.arena.borrow().len()
    }

    pub fn is_alive(&self, id: DerivationId) -> bool {
        self.inner.arena.borrow().contains(id)
    }

    /// Remove a derivation and unsubscribe it everywhere. Returns false if
    /// it was already gone.
    pub fn teardown(&self, id: DerivationId) -> bool {
        let removed = self.inner.arena.borrow_mut().remove(id);
        self.inner.scheduler.borrow_mut().cancel(id);
        match removed {
            Some(derivation) => {
                derivation.teardown();
                debug!(derivation = %id, kind = ?derivation.kind(), "derivation torn down");
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub fn pending_updates(&self) -> usize {
        self.inner.scheduler.borrow().pending()
    }

    /// Run queued watchers until the queue is empty. Returns how many runs
    /// happened. Calling this from inside a flush does nothing.
    pub fn flush(&self) -> usize {
        if !self.inner.scheduler.borrow_mut().begin_flush() {
            return 0;
        }
        let limit = self.config().max_update_count;
        let mut ran = 0;
        loop {
            let pass = self.inner.scheduler.borrow_mut().take_pass();
            if pass.is_empty() {
                break;
            }
            trace!(watchers = pass.len(), "flush pass");
            for id in pass {
                if !self.inner.scheduler.borrow_mut().record_run(id, limit) {
                    let err = ReactiveError::CircularUpdate { derivation: id, limit };
                    warn!(derivation = %id, limit, "possible infinite update loop");
                    self.report(&err);
                    continue;
                }
                let derivation = self.inner.arena.borrow().get(id);
                if let Some(derivation) = derivation {
                    derivation.run(self);
                    ran += 1;
                }
            }
        }
        self.inner.scheduler.borrow_mut().end_flush();
        ran
    }

    pub(crate) fn is_batched(&self) -> bool {
        self.config().scheduling == Scheduling::Batched
    }

    pub(crate) fn enqueue(&self, id: DerivationId) -> bool {
        let queued = self.inner.scheduler.borrow_mut().enqueue(id);
        if queued {
            trace!(derivation = %id, "queued");
        }
        queued
    }

    // ------------------------------------------------------------------
    // Error reporting
    // ------------------------------------------------------------------

    /// Install a hook that receives every caught derivation failure.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        self.inner.error_handler.borrow_mut().take();
    }

    /// Log a caught failure and pass it to the error handler.
    pub fn report(&self, err: &ReactiveError) {
        error!(error = %err, "reactive derivation failed");
        let handler = self.inner.error_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    pub(crate) fn reserve(&self) -> DerivationId {
        self.inner.arena.borrow_mut().reserve()
    }

    pub(crate) fn install(&self, id: DerivationId, derivation: Rc<dyn Derivation>) {
        self.inner.arena.borrow_mut().fill(id, derivation);
    }

    /// Mark computed subscribers dirty, following their readers, and collect
    /// the watchers reached along the way.
    pub(crate) fn invalidate(
        &self,
        subscribers: &[DerivationId],
        eager: &mut IndexSet<DerivationId>,
    ) {
        for &id in subscribers {
            let derivation = self.inner.arena.borrow().get(id);
            let Some(derivation) = derivation else {
                trace!(derivation = %id, "skipping torn-down subscriber");
                continue;
            };
            match derivation.kind() {
                NodeKind::Computed => {
                    if let Some(readers) = derivation.invalidate() {
                        self.invalidate(&readers.subscribers(), eager);
                    }
                }
                NodeKind::Watcher => {
                    eager.insert(id);
                }
            }
        }
    }

    /// Deliver a registry notification to one subscriber.
    pub(crate) fn dispatch_update(&self, id: DerivationId) {
        let derivation = self.inner.arena.borrow().get(id);
        match derivation {
            Some(derivation) => derivation.update(self),
            None => trace!(derivation = %id, "skipping torn-down subscriber"),
        }
    }

    /// Evaluate on behalf of `id`, attributing reads to it, then re-bind its
    /// dependencies to what this run touched. Failures (returned or
    /// panicked) are caught here and wrapped as evaluation errors.
    pub(crate) fn run_tracked<R>(
        &self,
        id: DerivationId,
        deps: &RefCell<DepSet>,
        evaluate: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let guard = self.context().enter(id);
        let result = catch_failure(evaluate);
        let touched = guard.finish();
        let previous = deps.replace(touched);
        context::rebind(id, &previous, &deps.borrow());
        result.map_err(|e| ReactiveError::evaluation(id, e))
    }
}

/// Run user code, turning a panic into an error.
pub(crate) fn catch_failure<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ReactiveError::from_panic(payload)),
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("derivations", &self.derivation_count())
            .field("pending", &self.pending_updates())
            .field("depth", &self.context().depth())
            .finish()
    }
}
