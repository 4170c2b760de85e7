//! Execution bridge: one guarded invocation of an instance's entry function.
//!
//! Order of events for a run:
//!
//! 1. take the instance's admission slot (runs on one name are serialized)
//! 2. pick the run's own buffer, or else the instance's bound one
//! 3. take a slot in the process-wide run pool
//! 4. clear `cancelled` and arm the watchdog for `now + timeout`
//! 5. send `Invoke` to the isolate thread and await the reply. On expiry the
//!    watchdog terminates the isolate and fires the run's cancel signal, which
//!    wakes a thread parked on pending promises or timers
//! 6. disarm the watchdog; if it fired, resume the isolate
//! 7. release the pool slot, then admission
//!
//! Queue time spent waiting for admission or a pool slot does not count
//! against the timeout.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::buffer::ExternalBuffer;
use crate::command::{InvokeFailure, WorkerCommand};
use crate::error::{Result, RuntimeError};
use crate::instance::ScriptInstance;
use crate::semaphore::Semaphore;

/// Run `instance` to completion on a detached task.
///
/// The run is spawned so that dropping the caller's future cannot leave the
/// watchdog armed or the admission gate in limbo. A caller that supplied a
/// buffer must keep it alive until the run finishes even if it stops waiting.
pub(crate) async fn run(
    instance: Arc<ScriptInstance>,
    pool: Arc<Semaphore>,
    buffer: Option<ExternalBuffer>,
    timeout: Duration,
) -> Result<()> {
    let name = instance.name.clone();
    tokio::spawn(async move { execute(&instance, &pool, buffer, timeout).await })
        .await
        .unwrap_or_else(|e| {
            tracing::error!("[run:{}] Run task failed: {}", name, e);
            Err(RuntimeError::InstanceClosed(name))
        })
}

async fn execute(
    instance: &ScriptInstance,
    pool: &Semaphore,
    buffer: Option<ExternalBuffer>,
    timeout: Duration,
) -> Result<()> {
    let name = &instance.name;
    let _admitted = instance.admission.acquire().await;

    let Some(cmd_tx) = instance.sender() else {
        return Err(RuntimeError::InstanceClosed(name.clone()));
    };
    let buffer = buffer.or_else(|| instance.bound_buffer());

    let _slot = pool.acquire().await;

    instance.cancelled.store(false, Ordering::SeqCst);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    {
        let isolate = instance.isolate.clone();
        let cancelled = Arc::clone(&instance.cancelled);
        instance
            .watchdog
            .rearm(Instant::now() + timeout, move || {
                isolate.terminate_execution();
                cancelled.store(true, Ordering::SeqCst);
                let _ = cancel_tx.send(());
            });
    }

    tracing::debug!("[execute:{}] Invoking with timeout {:?}", name, timeout);
    let (reply_tx, reply_rx) = oneshot::channel();
    let reply = match cmd_tx
        .send(WorkerCommand::Invoke {
            buffer,
            cancel: cancel_rx,
            reply: reply_tx,
        })
        .await
    {
        Ok(()) => reply_rx.await.ok(),
        Err(_) => None,
    };

    // The callback runs under the watchdog lock, so after cancel() returns
    // `cancelled` reflects whether termination was requested.
    instance.watchdog.cancel();
    let timed_out = instance.cancelled.swap(false, Ordering::SeqCst);
    if timed_out {
        instance.isolate.cancel_terminate_execution();
        tracing::debug!("[execute:{}] Resumed after termination", name);
    }

    record(instance, &reply, timed_out);

    match reply {
        None => Err(RuntimeError::InstanceClosed(name.clone())),
        Some(_) if timed_out => {
            tracing::warn!("[execute:{}] Timed out after {:?}", name, timeout);
            Err(RuntimeError::Timeout {
                name: name.clone(),
                timeout,
            })
        }
        Some(Ok(())) => Ok(()),
        Some(Err(InvokeFailure::Exception(message))) => Err(RuntimeError::ScriptRuntime {
            name: name.clone(),
            message,
        }),
        Some(Err(InvokeFailure::Terminated)) => Err(RuntimeError::ScriptRuntime {
            name: name.clone(),
            message: "execution terminated".to_string(),
        }),
    }
}

fn record(
    instance: &ScriptInstance,
    reply: &Option<std::result::Result<(), InvokeFailure>>,
    timed_out: bool,
) {
    let stats = &instance.stats;
    stats.runs.fetch_add(1, Ordering::Relaxed);
    *stats.last_run_at.lock() = Some(Utc::now());
    if timed_out {
        stats.timeouts.fetch_add(1, Ordering::Relaxed);
    } else if !matches!(reply, Some(Ok(()))) {
        stats.failures.fetch_add(1, Ordering::Relaxed);
    }
}
