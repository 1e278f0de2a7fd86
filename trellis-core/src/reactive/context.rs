//! Derivation Context
//!
//! The derivation context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a field is read, we
//! attach the current computation to that field's registry.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one context holding a stack of
//! frames. Entering a tracked evaluation pushes a frame; the returned guard
//! pops it. Nested evaluations (a computed read while a watcher runs) push
//! on top and restore the outer frame when they finish.
//!
//! A frame can also be *untracked*: reads inside it attach nothing, even if
//! an outer frame is tracking.

use std::cell::RefCell;

use tracing::trace;

use crate::graph::DerivationId;

use super::dep::{Dep, DepSet};

/// One entry in the context stack.
#[derive(Debug)]
struct Frame {
    /// The derivation being evaluated, or `None` for an untracked frame.
    derivation: Option<DerivationId>,
    /// Registries read during this evaluation, in first-read order.
    deps: DepSet,
}

#[derive(Debug, Default)]
pub struct DerivationContext {
    stack: RefCell<Vec<Frame>>,
}

/// Guard that pops the frame when dropped.
///
/// This keeps the stack balanced even if evaluation unwinds.
pub struct TrackingGuard<'a> {
    ctx: &'a DerivationContext,
    derivation: Option<DerivationId>,
    popped: bool,
}

impl DerivationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking reads on behalf of `derivation`.
    ///
    /// The new frame starts with an empty dependency set; the previous set
    /// is reconciled by the caller once the guard is finished.
    pub fn enter(&self, derivation: DerivationId) -> TrackingGuard<'_> {
        self.push(Some(derivation))
    }

    /// Suspend tracking until the guard is dropped.
    pub fn enter_untracked(&self) -> TrackingGuard<'_> {
        self.push(None)
    }

    fn push(&self, derivation: Option<DerivationId>) -> TrackingGuard<'_> {
        self.stack.borrow_mut().push(Frame {
            derivation,
            deps: DepSet::new(),
        });
        TrackingGuard {
            ctx: self,
            derivation,
            popped: false,
        }
    }

    /// Check if reads are currently attributed to a derivation.
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// The derivation that reads are attributed to, if any.
    pub fn current(&self) -> Option<DerivationId> {
        self.stack.borrow().last().and_then(|frame| frame.derivation)
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Record a read of `dep` in the top frame and subscribe the active
    /// derivation to it. Repeated reads within one frame are ignored.
    ///
    /// Returns whether a derivation was active.
    pub fn track(&self, dep: &Dep) -> bool {
        let derivation = {
            let mut stack = self.stack.borrow_mut();
            let Some(frame) = stack.last_mut() else {
                return false;
            };
            let Some(derivation) = frame.derivation else {
                return false;
            };
            if frame.deps.contains_key(&dep.id()) {
                return true;
            }
            frame.deps.insert(dep.id(), dep.clone());
            derivation
        };
        if dep.add_subscriber(derivation) {
            trace!(?derivation, dep = ?dep.id(), "subscribed");
        }
        true
    }

    /// Number of distinct registries read so far in the top frame.
    pub fn tracked_count(&self) -> usize {
        self.stack.borrow().last().map(|frame| frame.deps.len()).unwrap_or(0)
    }

    fn pop(&self, expected: Option<DerivationId>) -> DepSet {
        let popped = self.stack.borrow_mut().pop();
        match popped {
            Some(frame) => {
                // Catches guards dropped out of order.
                debug_assert_eq!(
                    frame.derivation, expected,
                    "DerivationContext mismatch: expected {:?}, got {:?}",
                    expected, frame.derivation
                );
                frame.deps
            }
            None => DepSet::new(),
        }
    }
}

impl TrackingGuard<'_> {
    /// Pop the frame and return the registries it collected.
    pub(crate) fn finish(mut self) -> DepSet {
        self.popped = true;
        self.ctx.pop(self.derivation)
    }
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.ctx.pop(self.derivation);
        }
    }
}

/// Unsubscribe `derivation` from every registry in `previous` that is not
/// in `current`. Registries in `current` were subscribed at read time.
pub(crate) fn rebind(derivation: DerivationId, previous: &DepSet, current: &DepSet) -> usize {
    let mut dropped = 0;
    for (id, dep) in previous {
        if !current.contains_key(id) {
            dep.remove_subscriber(derivation);
            dropped += 1;
        }
    }
    if dropped > 0 {
        trace!(?derivation, dropped, kept = current.len(), "rebound dependencies");
    }
    dropped
}

/// Unsubscribe `derivation` from every registry in `deps`.
pub(crate) fn release(derivation: DerivationId, deps: &DepSet) {
    for dep in deps.values() {
        dep.remove_subscriber(derivation);
    }
}
