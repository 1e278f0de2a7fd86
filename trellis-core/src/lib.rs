//! Trellis Core
//!
//! This crate provides a dependency-tracking runtime for observed data. It
//! implements:
//!
//! - Observation of plain data into reactive objects and arrays
//! - Automatic dependency collection during evaluation
//! - Lazily cached computed values
//! - Watchers with change callbacks, optionally batched
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observed containers, registries, computed values, watchers
//! - `graph`: derivation ids, the derivation arena and the update scheduler
//! - `config`: runtime configuration
//! - `error`: the error type shared by every module
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use serde_json::json;
//! use trellis_core::{Computed, Runtime, Value, Watcher};
//!
//! let rt = Runtime::new();
//! let state = rt.observe_object(json!({"count": 1})).unwrap();
//!
//! // A derived value
//! let source = state.clone();
//! let doubled = Computed::try_new(&rt, move || {
//!     Ok(source.get("count")?.as_f64().unwrap_or(0.0) * 2.0)
//! });
//!
//! // A watcher on the derived value
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = log.clone();
//! let upstream = doubled.clone();
//! let _watcher = Watcher::new(&rt, move || upstream.get().ok(), move |new, _| {
//!     sink.borrow_mut().push(*new);
//! });
//!
//! state.set("count", 5).unwrap();
//! assert_eq!(*log.borrow(), vec![Some(10.0)]);
//! assert_eq!(state.get("count").unwrap(), Value::from(5));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{RuntimeConfig, Scheduling};
pub use error::{ReactiveError, Result};
pub use graph::{DerivationId, NodeKind};
pub use reactive::{
    Computed, ComputedState, Dep, IntoValue, PathSource, ProxyObject, ReactiveArray, ReactiveObject,
    Runtime, Scope, Value, WatchOptions, WatchValue, Watcher, WeakRuntime,
};
