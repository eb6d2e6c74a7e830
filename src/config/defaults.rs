//! Built-in defaults (layer 1)

use serde::Serialize;

use crate::job::{DEFAULT_PREFIX, DEFAULT_SUFFIX};
use crate::scheduler::default_threads;
use crate::worker::DEFAULT_ERROR_TOKEN;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize)]
pub struct BuiltinDefaults {
    /// Pool size per step (default: available parallelism)
    pub threads: usize,

    /// Per-command timeout in seconds (default: none)
    pub timeout_seconds: Option<u64>,

    /// Time between SIGTERM and SIGKILL (default: 10)
    pub grace_seconds: u64,

    /// Stderr token marking a worker as failed (default: "ERROR")
    pub error_token: String,

    /// Treat a non-zero exit as failure (default: false)
    pub fail_on_nonzero_exit: bool,

    pub decorator_prefix: String,
    pub decorator_suffix: String,

    /// Backend mode (default: "local")
    pub backend_mode: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            timeout_seconds: None,
            grace_seconds: 10,
            error_token: DEFAULT_ERROR_TOKEN.to_string(),
            fail_on_nonzero_exit: false,
            decorator_prefix: DEFAULT_PREFIX.to_string(),
            decorator_suffix: DEFAULT_SUFFIX.to_string(),
            backend_mode: "local".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "threads": self.threads,
            "timeout_seconds": self.timeout_seconds,
            "grace_seconds": self.grace_seconds,
            "error_token": self.error_token,
            "fail_on_nonzero_exit": self.fail_on_nonzero_exit,
            "decorator": {
                "prefix": self.decorator_prefix,
                "suffix": self.decorator_suffix
            },
            "backend": {
                "mode": self.backend_mode
            }
        })
    }
}
