//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a valid
//! configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// How watcher re-evaluations triggered by a write are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// Watchers re-run inside the write that notified them.
    #[default]
    Sync,
    /// Watchers are queued and run by `Runtime::flush`.
    Batched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduling: Scheduling,

    /// Upper bound on how many times a single watcher may run within one
    /// flush (or one synchronous notification chain) before it is reported
    /// as a circular update and skipped.
    pub max_update_count: u32,

    /// Emit a `trace!` event for every registry notification.
    pub trace_notifications: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::Sync,
            max_update_count: 100,
            trace_notifications: false,
        }
    }
}

impl RuntimeConfig {
    pub fn batched() -> Self {
        Self {
            scheduling: Scheduling::Batched,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ReactiveError::msg(format!("invalid runtime config: {e}")))
    }
}
