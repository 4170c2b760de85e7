//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the instance registry and its execution bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Global function every script must define.
    pub entry_function: String,
    /// Timeout used by `Registry::run_default`.
    pub default_timeout_ms: u64,
    /// Upper bound on running a script's top-level body during `create`.
    pub bootstrap_timeout_ms: u64,
    /// How many invocations may execute at once across all instances.
    pub max_concurrent_runs: usize,
    /// Directory that relative script locations are resolved against.
    pub script_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            entry_function: "user_script".to_string(),
            default_timeout_ms: 1000,
            bootstrap_timeout_ms: 5000,
            max_concurrent_runs: default_max_concurrent_runs(),
            script_root: None,
        }
    }
}

impl RuntimeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    /// Set the entry function name.
    pub fn with_entry_function(mut self, name: impl Into<String>) -> Self {
        self.entry_function = name.into();
        self
    }

    /// Set the number of concurrent invocation slots. Zero is clamped to one.
    pub fn with_max_concurrent_runs(mut self, slots: usize) -> Self {
        self.max_concurrent_runs = slots.max(1);
        self
    }

    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_script_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.script_root = Some(root.into());
        self
    }
}

fn default_max_concurrent_runs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
