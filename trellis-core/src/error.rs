//! Error types for the reactive runtime.
//!
//! Failures inside derivations (getters, computed functions, watcher
//! callbacks) are caught at the tracking boundary and *reported* rather than
//! propagated to the write that triggered them. The remaining variants are
//! returned directly from the container API when it is misused.

use std::any::Any;

use thiserror::Error;

use crate::graph::DerivationId;

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derivation's getter failed during tracked evaluation.
    #[error("evaluation of derivation {derivation} failed: {source}")]
    Evaluation {
        derivation: DerivationId,
        #[source]
        source: Box<ReactiveError>,
    },

    /// A watcher's change callback failed.
    #[error("callback of watcher {derivation} failed: {source}")]
    Callback {
        derivation: DerivationId,
        #[source]
        source: Box<ReactiveError>,
    },

    #[error("field `{0}` is not declared on this object (use `insert` to add reactive fields)")]
    UnknownField(String),

    #[error("index {index} is out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid watch path `{0}`")]
    InvalidPath(String),

    #[error("path `{path}` cannot be resolved at segment `{segment}`")]
    PathNotFound { path: String, segment: String },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("property `{0}` is read-only")]
    ReadOnly(String),

    #[error("computed {0} read itself while evaluating")]
    CircularComputed(DerivationId),

    #[error("watcher {derivation} ran more than {limit} times in one flush")]
    CircularUpdate { derivation: DerivationId, limit: u32 },

    #[error("computed {0} has no value yet")]
    NoValue(DerivationId),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

impl ReactiveError {
    /// Build an ad-hoc error from inside a getter or callback.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub(crate) fn evaluation(derivation: DerivationId, source: ReactiveError) -> Self {
        Self::Evaluation {
            derivation,
            source: Box::new(source),
        }
    }

    pub(crate) fn callback(derivation: DerivationId, source: ReactiveError) -> Self {
        Self::Callback {
            derivation,
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping `Evaluation`/`Callback` layers.
    pub fn root_cause(&self) -> &ReactiveError {
        match self {
            Self::Evaluation { source, .. } | Self::Callback { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
