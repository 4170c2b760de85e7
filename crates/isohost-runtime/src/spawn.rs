//! Isolate thread startup.
//!
//! Spawns the dedicated OS thread for one instance and waits, cooperatively,
//! for it to report either a resolved entry function or an initialization
//! failure. The top-level body is guarded by a bootstrap watchdog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use deno_core::v8;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::command::{InitFailure, WorkerCommand};
use crate::error::RuntimeError;
use crate::platform::Platform;
use crate::watchdog::Watchdog;
use crate::worker::{WorkerSetup, run_worker};

/// Depth of each instance's command queue.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// A started isolate thread whose entry function is resolved.
pub(crate) struct SpawnedIsolate {
    pub cmd_tx: mpsc::Sender<WorkerCommand>,
    pub isolate: v8::IsolateHandle,
    /// Fires after the thread has dropped its isolate and platform handle.
    pub exited: oneshot::Receiver<()>,
}

/// What to start.
pub(crate) struct SpawnRequest<'a> {
    pub name: &'a str,
    pub code: String,
    pub entry: &'a str,
    pub bootstrap_timeout: Duration,
}

/// Start an isolate thread and wait for its initialization to finish.
pub(crate) async fn spawn_isolate(
    platform: &Platform,
    request: SpawnRequest<'_>,
) -> Result<SpawnedIsolate, RuntimeError> {
    let SpawnRequest {
        name,
        code,
        entry,
        bootstrap_timeout,
    } = request;
    tracing::debug!("[spawn_isolate] Starting for {}", name);

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (handle_tx, handle_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let setup = WorkerSetup {
        name: name.to_string(),
        code,
        entry: entry.to_string(),
        cmd_rx,
        handle_tx,
        ready_tx,
        bootstrap_cancel: cancel_rx,
    };
    let platform = platform.clone();
    let thread_name = name.to_string();

    thread::Builder::new()
        .name(format!("isolate:{}", name))
        .spawn(move || {
            tracing::debug!("[spawn_isolate:{}] Thread started", thread_name);
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(run_worker(setup)),
                Err(e) => tracing::error!(
                    "[spawn_isolate:{}] Failed to build runtime: {}",
                    thread_name,
                    e
                ),
            }
            drop(platform);
            let _ = exit_tx.send(());
            tracing::debug!("[spawn_isolate:{}] Thread exiting", thread_name);
        })
        .map_err(RuntimeError::SpawnFailed)?;

    let isolate = handle_rx.await.map_err(|_| startup_lost(name))?;

    let watchdog = Watchdog::new(name);
    let timed_out = Arc::new(AtomicBool::new(false));
    {
        let isolate = isolate.clone();
        let timed_out = Arc::clone(&timed_out);
        // Terminating stops a busy body; the cancel signal stops one parked
        // on timers or promises that never settle.
        watchdog.rearm(Instant::now() + bootstrap_timeout, move || {
            isolate.terminate_execution();
            timed_out.store(true, Ordering::SeqCst);
            let _ = cancel_tx.send(());
        });
    }

    let ready = ready_rx.await;
    watchdog.cancel();

    let fired = timed_out.load(Ordering::SeqCst);
    match ready {
        Ok(Ok(())) => {
            if fired {
                // Fired after the body finished; clear it so the first run
                // is not terminated on entry.
                isolate.cancel_terminate_execution();
            }
            tracing::debug!("[spawn_isolate:{}] Ready", name);
            Ok(SpawnedIsolate {
                cmd_tx,
                isolate,
                exited: exit_rx,
            })
        }
        Ok(Err(failure)) => Err(init_error(name, entry, failure, fired, bootstrap_timeout)),
        Err(_) => Err(startup_lost(name)),
    }
}

fn init_error(
    name: &str,
    entry: &str,
    failure: InitFailure,
    fired: bool,
    bootstrap_timeout: Duration,
) -> RuntimeError {
    match failure {
        InitFailure::Terminated => RuntimeError::Bootstrap {
            name: name.to_string(),
            message: format!("timed out after {:?}", bootstrap_timeout),
        },
        // A watchdog firing mid-compile surfaces as a compile failure with no
        // exception; report what actually happened.
        _ if fired => RuntimeError::Bootstrap {
            name: name.to_string(),
            message: format!("timed out after {:?}", bootstrap_timeout),
        },
        InitFailure::Compile(message) => RuntimeError::Compile {
            name: name.to_string(),
            message,
        },
        InitFailure::Bootstrap(message) => RuntimeError::Bootstrap {
            name: name.to_string(),
            message,
        },
        InitFailure::EntryNotFound => RuntimeError::EntryNotFound {
            name: name.to_string(),
            entry: entry.to_string(),
        },
    }
}

fn startup_lost(name: &str) -> RuntimeError {
    RuntimeError::Bootstrap {
        name: name.to_string(),
        message: "isolate thread exited during startup".to_string(),
    }
}
