//! Error types for the instance runtime.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by registry and instance operations.
///
/// None of these unwind past a single operation: a failed `create` never
/// leaves a half-built instance in the registry, and a failed `run` leaves the
/// instance usable for the next call.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed to load script source {location}: {source}")]
    SourceUnavailable {
        location: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to compile script for {name}: {message}")]
    Compile { name: String, message: String },

    #[error("Script bootstrap failed for {name}: {message}")]
    Bootstrap { name: String, message: String },

    #[error("Entry function '{entry}' not found in {name}")]
    EntryNotFound { name: String, entry: String },

    #[error("Script error in {name}: {message}")]
    ScriptRuntime { name: String, message: String },

    #[error("Instance {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Instance {0} has been disposed")]
    InstanceClosed(String),

    #[error("Failed to spawn isolate thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl RuntimeError {
    /// Whether this error was produced while creating an instance.
    ///
    /// Initialization failures are terminal for the `create` call that
    /// produced them; the name stays free.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            RuntimeError::SourceUnavailable { .. }
                | RuntimeError::Compile { .. }
                | RuntimeError::Bootstrap { .. }
                | RuntimeError::EntryNotFound { .. }
                | RuntimeError::SpawnFailed(_)
        )
    }
}

/// Errors from the process-wide engine platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform still has {0} live handles")]
    InUse(usize),

    #[error("Platform has already been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
