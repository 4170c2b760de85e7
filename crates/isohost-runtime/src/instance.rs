//! Script instance handle.
//!
//! A [`ScriptInstance`] is the scheduler-side half of one compiled script: it
//! owns the command channel to the isolate thread, the thread-safe isolate
//! handle used for termination, the admission gate, the watchdog, and the
//! currently bound external buffer. The isolate itself never leaves its
//! thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use deno_core::v8;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::buffer::ExternalBuffer;
use crate::command::WorkerCommand;
use crate::semaphore::Semaphore;
use crate::spawn::SpawnedIsolate;
use crate::watchdog::Watchdog;

/// Snapshot of an instance for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub name: String,
    pub entry: String,
    pub created_at: DateTime<Utc>,
    pub runs: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// A run currently holds the admission gate.
    pub busy: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Per-instance counters.
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    pub runs: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub last_run_at: Mutex<Option<DateTime<Utc>>>,
}

pub struct ScriptInstance {
    pub(crate) name: String,
    pub(crate) entry: String,
    created_at: DateTime<Utc>,
    /// Set as soon as disposal begins, before waiting for admission.
    closed: AtomicBool,
    /// `None` once disposed.
    cmd_tx: Mutex<Option<mpsc::Sender<WorkerCommand>>>,
    pub(crate) isolate: v8::IsolateHandle,
    /// Single-flight gate for runs and disposal.
    pub(crate) admission: Semaphore,
    /// Set by the watchdog callback; cleared on resume.
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) watchdog: Watchdog,
    buffer: Mutex<Option<ExternalBuffer>>,
    exited: Mutex<Option<oneshot::Receiver<()>>>,
    pub(crate) stats: RunStats,
}

impl std::fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ScriptInstance {
    pub(crate) fn new(name: &str, entry: &str, spawned: SpawnedIsolate) -> Self {
        Self {
            name: name.to_string(),
            entry: entry.to_string(),
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
            cmd_tx: Mutex::new(Some(spawned.cmd_tx)),
            isolate: spawned.isolate,
            admission: Semaphore::new(1),
            cancelled: Arc::new(AtomicBool::new(false)),
            watchdog: Watchdog::new(name),
            buffer: Mutex::new(None),
            exited: Mutex::new(Some(spawned.exited)),
            stats: RunStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the entry function resolved at creation.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Replace the external buffer view. The previous view is discarded,
    /// never freed.
    pub fn bind_buffer(&self, buffer: ExternalBuffer) {
        *self.buffer.lock() = Some(buffer);
    }

    pub(crate) fn bound_buffer(&self) -> Option<ExternalBuffer> {
        *self.buffer.lock()
    }

    /// Whether the last run was terminated and has not been resumed yet.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.admission.available() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sender for the isolate thread, or `None` once disposal has begun.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<WorkerCommand>> {
        if self.is_closed() {
            return None;
        }
        self.cmd_tx.lock().clone()
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            name: self.name.clone(),
            entry: self.entry.clone(),
            created_at: self.created_at,
            runs: self.stats.runs.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            busy: self.is_busy(),
            last_run_at: *self.stats.last_run_at.lock(),
        }
    }

    /// Shut the isolate thread down once no run holds the admission gate.
    ///
    /// Idempotent. The run holding the gate finishes normally; runs still
    /// queued for it fail with `InstanceClosed`.
    pub(crate) async fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _admitted = self.admission.acquire().await;

        let Some(cmd_tx) = self.cmd_tx.lock().take() else {
            return;
        };
        drop(cmd_tx);
        self.watchdog.cancel();
        *self.buffer.lock() = None;

        let exited = self.exited.lock().take();
        if let Some(exited) = exited {
            // Err means the thread is already gone.
            let _ = exited.await;
        }
        tracing::debug!("[dispose:{}] Isolate thread stopped", self.name);
    }
}
