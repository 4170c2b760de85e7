//! Server Application State
//!
//! Shared state accessible by all route handlers.

use std::sync::Arc;

use isohost_runtime::Registry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Named script instances
    registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { registry }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn instance_count(&self) -> usize {
        self.inner.registry.len()
    }
}
