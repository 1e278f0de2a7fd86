//! Dependency Graph
//!
//! This module holds the derivation side of the dependency graph.
//!
//! # Overview
//!
//! - Nodes are derivations (watchers and computed values), stored in an
//!   arena and addressed by [`DerivationId`].
//! - Edges live in the dependency registries of observed fields: each
//!   registry stores the ids of the derivations subscribed to it, and each
//!   derivation stores the registries it subscribed to during its last run.
//!
//! Registries never own derivations, so there are no reference cycles
//! between data and the computations that read it. Tearing a derivation
//! down is an arena removal plus a walk over its own registry list.
//!
//! The [`UpdateScheduler`] coalesces watcher runs when the runtime is
//! configured for batched scheduling.

mod arena;
mod node;
mod scheduler;

pub(crate) use arena::DerivationArena;
pub(crate) use node::Derivation;
pub use node::{DerivationId, NodeKind};
pub use scheduler::UpdateScheduler;
