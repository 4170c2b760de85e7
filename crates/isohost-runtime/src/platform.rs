//! Process-wide engine platform.
//!
//! V8 is initialized once per process and can be torn down once. Instead of
//! relying on call ordering, every user holds a [`Platform`] handle: the
//! registry keeps one, and so does each isolate thread until it exits.
//! Shutdown is only allowed when the caller holds the last handle.

use std::sync::{Mutex, PoisonError};

use deno_core::JsRuntime;
use deno_core::v8;

use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running { handles: usize },
    ShutDown,
}

static LIFECYCLE: Mutex<Lifecycle> = Mutex::new(Lifecycle::Uninitialized);

fn lifecycle() -> std::sync::MutexGuard<'static, Lifecycle> {
    LIFECYCLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Token proving the engine platform is up.
#[derive(Debug)]
pub struct Platform {
    _private: (),
}

impl Platform {
    /// Initialize the platform, or join it if it is already running.
    ///
    /// Call this before spawning a tokio runtime where possible; V8 prefers to
    /// be brought up from the main thread.
    pub fn init() -> Result<Platform, PlatformError> {
        let mut state = lifecycle();
        match *state {
            Lifecycle::Uninitialized => {
                tracing::debug!("[platform] Initializing V8");
                JsRuntime::init_platform(None, false);
                *state = Lifecycle::Running { handles: 1 };
            }
            Lifecycle::Running { handles } => {
                *state = Lifecycle::Running {
                    handles: handles + 1,
                };
            }
            Lifecycle::ShutDown => return Err(PlatformError::ShutDown),
        }
        Ok(Platform { _private: () })
    }

    /// Number of live handles, including this one.
    pub fn live_handles(&self) -> usize {
        match *lifecycle() {
            Lifecycle::Running { handles } => handles,
            _ => 0,
        }
    }

    /// Tear the platform down. Fails while any other handle is alive.
    pub fn shutdown(self) -> Result<(), PlatformError> {
        let outcome = {
            let mut state = lifecycle();
            match *state {
                Lifecycle::Running { handles: 1 } => {
                    *state = Lifecycle::ShutDown;
                    Ok(())
                }
                Lifecycle::Running { handles } => Err(PlatformError::InUse(handles - 1)),
                Lifecycle::Uninitialized | Lifecycle::ShutDown => Err(PlatformError::ShutDown),
            }
        };
        // On error `self` drops here and gives its count back.
        outcome?;
        std::mem::forget(self);

        tracing::debug!("[platform] Disposing V8");
        // SAFETY: this was the last handle, so no isolate thread is alive and
        // no isolate will be created again.
        unsafe {
            v8::V8::dispose();
        }
        v8::V8::dispose_platform();
        Ok(())
    }
}

impl Clone for Platform {
    fn clone(&self) -> Self {
        let mut state = lifecycle();
        if let Lifecycle::Running { handles } = *state {
            *state = Lifecycle::Running {
                handles: handles + 1,
            };
        }
        Platform { _private: () }
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        let mut state = lifecycle();
        if let Lifecycle::Running { handles } = *state {
            *state = Lifecycle::Running {
                handles: handles.saturating_sub(1),
            };
        }
    }
}
