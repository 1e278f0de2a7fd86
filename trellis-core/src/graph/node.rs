//! Graph Nodes
//!
//! This module defines the identities and the behavior shared by every
//! derivation living in the dependency graph.

use std::fmt;

use crate::reactive::{Dep, Runtime};

/// Stable identifier for a derivation in the arena.
///
/// The index addresses an arena slot; the generation distinguishes
/// successive occupants of the same slot, so a stale id held by a registry
/// never reaches a newer derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationId {
    index: u32,
    generation: u32,
}

impl DerivationId {
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the arena slot index.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DerivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The kind of derivation in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An eager derivation. Re-runs (or is queued) on every notification
    /// and reports changes through its callback.
    Watcher,

    /// A lazy derivation. Notification only marks it dirty; it re-evaluates
    /// on the next read.
    Computed,
}

/// Behavior the runtime needs from anything stored in the arena.
///
/// Registries hold [`DerivationId`]s only; the runtime resolves an id to
/// its derivation and calls these methods with itself as context.
pub(crate) trait Derivation {
    fn kind(&self) -> NodeKind;

    /// Called when a registry this derivation subscribes to notifies.
    fn update(&self, rt: &Runtime);

    /// Mark a lazy derivation stale without running anything.
    ///
    /// Returns the registry of its readers if it was fresh, so they can be
    /// invalidated in turn. Eager derivations have nothing to mark.
    fn invalidate(&self) -> Option<Dep> {
        None
    }

    /// Called by the scheduler when a queued derivation is flushed.
    fn run(&self, rt: &Runtime);

    /// Deactivate and unsubscribe from every registry.
    fn teardown(&self);
}
