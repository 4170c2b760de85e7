//! Single-shot, rearmable deadline timer.
//!
//! The timer task lives on whichever tokio runtime called [`Watchdog::rearm`],
//! which is the scheduler driving the registry. The expiry callback runs while
//! the state lock is held, so once [`Watchdog::cancel`] reports
//! [`Disarm::AlreadyFired`] every effect of the callback is visible to the
//! caller.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Observable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Armed { deadline: Instant },
}

/// Outcome of [`Watchdog::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disarm {
    /// A pending deadline was cancelled before it fired.
    Cancelled,
    /// The deadline already fired; its callback has run.
    AlreadyFired,
    /// Nothing was armed since the last cancel.
    Idle,
}

#[derive(Debug)]
struct Inner {
    state: WatchdogState,
    /// Bumped on every rearm/cancel so a stale timer task cannot fire.
    generation: u64,
    fired: bool,
    task: Option<AbortHandle>,
}

/// Deadline timer bound to one instance.
#[derive(Debug)]
pub struct Watchdog {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl Watchdog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner {
                state: WatchdogState::Idle,
                generation: 0,
                fired: false,
                task: None,
            })),
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.inner.lock().state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state(), WatchdogState::Armed { .. })
    }

    /// Arm the timer for `deadline`, replacing any pending deadline.
    ///
    /// `on_expire` runs exactly once if the deadline passes before the next
    /// `rearm` or `cancel`. Must be called from within a tokio runtime.
    pub fn rearm<F>(&self, deadline: Instant, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation = inner.generation.wrapping_add(1);
        inner.state = WatchdogState::Armed { deadline };
        inner.fired = false;

        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let mut inner = shared.lock();
            if inner.generation != generation || inner.state == WatchdogState::Idle {
                return;
            }
            inner.state = WatchdogState::Idle;
            inner.fired = true;
            inner.task = None;
            tracing::debug!("[watchdog:{}] Deadline expired", name);
            on_expire();
        });
        inner.task = Some(task.abort_handle());
    }

    /// Disarm the timer. A no-op if it already fired.
    pub fn cancel(&self) -> Disarm {
        let mut inner = self.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);

        let outcome = match inner.state {
            WatchdogState::Armed { .. } => Disarm::Cancelled,
            WatchdogState::Idle if inner.fired => Disarm::AlreadyFired,
            WatchdogState::Idle => Disarm::Idle,
        };

        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.state = WatchdogState::Idle;
        inner.fired = false;
        outcome
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock().task.take() {
            task.abort();
        }
    }
}
