//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What to do with a panic raised by user code inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Resume the panic after logging, so the bug surfaces.
    Propagate,
    /// Log it and keep the rest of the graph running.
    Log,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ErrorPolicy::Propagate
        } else {
            ErrorPolicy::Log
        }
    }
}

/// Settings for one [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub error_policy: ErrorPolicy,
    /// Log a warning for every write rejected by a closed mutation gate.
    pub warn_on_rejected_write: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            warn_on_rejected_write: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}
