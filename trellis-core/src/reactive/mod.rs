//! Reactive Primitives
//!
//! This module implements the core reactive system: observed data, computed
//! values and watchers, tied together by a runtime.
//!
//! # Concepts
//!
//! ## Observed Data
//!
//! Plain data passed to [`Runtime::observe`] becomes a tree of
//! [`ReactiveObject`]s and [`ReactiveArray`]s. Every field owns a dependency
//! registry ([`Dep`]). Reading a field while a derivation is evaluating
//! subscribes that derivation; writing a different value notifies every
//! subscriber.
//!
//! ## Computed Values
//!
//! A [`Computed`] caches its getter's result. A dependency change only marks
//! it dirty; it re-evaluates on the next read.
//!
//! ## Watchers
//!
//! A [`Watcher`] re-runs its getter whenever a dependency changes and calls
//! its callback with the new and old value when the result differs.
//!
//! # Implementation Notes
//!
//! Each runtime owns a [`DerivationContext`], a stack of evaluation frames.
//! Reads consult the top frame to find the derivation to subscribe.
//! Dependencies are re-collected on every evaluation, so a derivation only
//! re-runs for state it read last time.

mod array;
mod computed;
mod context;
mod dep;
mod object;
mod observer;
mod proxy;
mod runtime;
mod scope;
mod value;
mod watcher;

pub use array::ReactiveArray;
pub use computed::{Computed, ComputedState};
pub use context::{DerivationContext, TrackingGuard};
pub use dep::{Dep, DepId};
pub use object::ReactiveObject;
pub use observer::{resolve_path, traverse, PathSource};
pub use proxy::ProxyObject;
pub use runtime::{Runtime, WeakRuntime};
pub use scope::Scope;
pub use value::{ContainerId, IntoValue, Value};
pub use watcher::{WatchOptions, WatchValue, Watcher};
