//! Isohost runtime
//!
//! Hosts named, independently compiled JavaScript instances on V8 and runs
//! their entry function against caller-owned memory under a deadline.
//!
//! # Architecture
//!
//! - Each instance runs in a dedicated OS thread with its own isolate and a
//!   current-thread tokio runtime
//! - The caller's scheduler talks to it over a bounded command channel
//! - A per-instance admission gate serializes runs on one name
//! - A process-wide pool semaphore bounds concurrent invocations
//! - A watchdog on the scheduler terminates overrunning calls through the
//!   thread-safe isolate handle, and the bridge resumes the isolate afterwards
//!
//! ```ignore
//! let platform = Platform::init()?;
//! let registry = Registry::new(&platform, RuntimeConfig::default());
//! registry.create("sum", "scripts/sum.js").await?;
//! registry.run_with_buffer("sum", buffer, Duration::from_secs(1)).await?;
//! ```

mod bridge;
mod buffer;
mod command;
mod config;
mod error;
mod instance;
mod platform;
mod registry;
mod semaphore;
mod source;
mod spawn;
mod watchdog;
mod worker;

pub use buffer::ExternalBuffer;
pub use config::RuntimeConfig;
pub use error::{PlatformError, Result, RuntimeError};
pub use instance::{InstanceInfo, ScriptInstance};
pub use platform::Platform;
pub use registry::Registry;
pub use semaphore::{Permit, Semaphore};
pub use source::{FsSourceLoader, InMemorySources, SourceLoader};
pub use watchdog::{Disarm, Watchdog, WatchdogState};
