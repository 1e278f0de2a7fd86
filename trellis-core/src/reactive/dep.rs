//! Dependency registries.
//!
//! A [`Dep`] records which derivations read a piece of reactive state. Each
//! tracked field owns one, each container owns one for its structure (key
//! set or array contents), and each computed value owns one for its
//! downstream readers.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::graph::DerivationId;

use super::Runtime;

/// Unique identifier for a dependency registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    /// Generate a new unique registry ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DepId {
    fn default() -> Self {
        Self::new()
    }
}

/// Registries touched by one evaluation, keyed by id, in read order.
pub(crate) type DepSet = IndexMap<DepId, Dep>;

/// Snapshot of a subscriber list taken at the start of a notify.
pub(crate) type SubscriberSnapshot = SmallVec<[DerivationId; 8]>;

struct DepInner {
    id: DepId,
    subscribers: RefCell<IndexSet<DerivationId>>,
}

/// A dependency registry.
///
/// Cloning a `Dep` yields another handle to the same registry.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::new(),
                subscribers: RefCell::new(IndexSet::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Subscribe a derivation. Returns false if it was already subscribed.
    pub fn add_subscriber(&self, id: DerivationId) -> bool {
        self.inner.subscribers.borrow_mut().insert(id)
    }

    /// Unsubscribe a derivation, keeping the order of the others.
    pub fn remove_subscriber(&self, id: DerivationId) -> bool {
        self.inner.subscribers.borrow_mut().shift_remove(&id)
    }

    pub fn has_subscriber(&self, id: DerivationId) -> bool {
        self.inner.subscribers.borrow().contains(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Current subscribers in subscription order.
    pub fn subscribers(&self) -> Vec<DerivationId> {
        self.inner.subscribers.borrow().iter().copied().collect()
    }

    /// Attach the runtime's active derivation, if any.
    pub fn depend(&self, rt: &Runtime) -> bool {
        rt.context().track(self)
    }

    /// Notify every subscriber.
    ///
    /// Computed subscribers, and the computed values downstream of them, are
    /// marked dirty first. The watchers reached that way are updated
    /// afterwards, in subscription order. The list is copied first:
    /// subscribers that unsubscribe (or subscribe others) while being
    /// updated do not disturb this pass.
    pub fn notify(&self, rt: &Runtime) {
        let snapshot: SubscriberSnapshot =
            self.inner.subscribers.borrow().iter().copied().collect();
        if rt.config().trace_notifications {
            trace!(dep = ?self.id(), subscribers = snapshot.len(), "notify");
        }
        let mut eager = IndexSet::new();
        rt.invalidate(&snapshot, &mut eager);
        for id in eager {
            rt.dispatch_update(id);
        }
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
