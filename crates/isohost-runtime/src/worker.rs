//! Isolate thread.
//!
//! Each instance owns one OS thread holding its `JsRuntime` and a
//! current-thread tokio runtime. The thread compiles the script, resolves the
//! entry function once, then serves `Invoke` commands until its channel
//! closes. This is the only place script code executes.

use std::sync::{Mutex, PoisonError};
use std::task::Poll;

use deno_core::JsRuntime;
use deno_core::PollEventLoopOptions;
use deno_core::RuntimeOptions;
use deno_core::v8;
use futures::future::poll_fn;
use tokio::sync::{mpsc, oneshot};

use crate::buffer::ExternalBuffer;
use crate::command::{InitFailure, InvokeFailure, WorkerCommand};

/// Mutex to serialize V8 isolate creation.
static ISOLATE_CREATE_LOCK: Mutex<()> = Mutex::new(());

/// Everything an isolate thread needs to start.
pub(crate) struct WorkerSetup {
    pub name: String,
    pub code: String,
    pub entry: String,
    pub cmd_rx: mpsc::Receiver<WorkerCommand>,
    /// Receives the thread-safe isolate handle as soon as the isolate exists.
    pub handle_tx: oneshot::Sender<v8::IsolateHandle>,
    pub ready_tx: oneshot::Sender<Result<(), InitFailure>>,
    /// Fired by the bootstrap watchdog.
    pub bootstrap_cancel: oneshot::Receiver<()>,
}

/// The main worker loop that runs inside the isolate thread.
pub(crate) async fn run_worker(setup: WorkerSetup) {
    let WorkerSetup {
        name,
        code,
        entry,
        mut cmd_rx,
        handle_tx,
        ready_tx,
        bootstrap_cancel,
    } = setup;

    let mut js_runtime = {
        let _lock = ISOLATE_CREATE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("[run_worker:{}] Creating JsRuntime", name);
        JsRuntime::new(RuntimeOptions::default())
    };

    if handle_tx
        .send(js_runtime.v8_isolate().thread_safe_handle())
        .is_err()
    {
        tracing::debug!("[run_worker:{}] Creator went away before startup", name);
        return;
    }

    let function = match bootstrap(&mut js_runtime, &code, &entry, bootstrap_cancel).await {
        Ok(function) => function,
        Err(failure) => {
            tracing::debug!("[run_worker:{}] Initialization failed: {:?}", name, failure);
            let _ = ready_tx.send(Err(failure));
            return;
        }
    };
    drop(code);

    if ready_tx.send(Ok(())).is_err() {
        tracing::debug!("[run_worker:{}] Creator went away after startup", name);
        return;
    }
    tracing::debug!("[run_worker:{}] Ready, entry '{}' bound", name, entry);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            WorkerCommand::Invoke {
                buffer,
                mut cancel,
                reply,
            } => {
                let result = invoke(&mut js_runtime, &function, buffer, &mut cancel).await;
                if let Err(InvokeFailure::Exception(message)) = &result {
                    tracing::warn!("[run_worker:{}] Script error: {}", name, message);
                }
                let _ = reply.send(result);
            }
        }
    }

    // Handles must go before the isolate that owns them.
    drop(function);
    drop(js_runtime);
    tracing::debug!("[run_worker:{}] Worker finished", name);
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

/// Compile and run the top-level body, then resolve the entry function.
async fn bootstrap(
    js_runtime: &mut JsRuntime,
    code: &str,
    entry: &str,
    mut cancel: oneshot::Receiver<()>,
) -> Result<v8::Global<v8::Function>, InitFailure> {
    {
        let scope = &mut js_runtime.handle_scope();
        let tc = &mut v8::TryCatch::new(scope);

        let source = v8::String::new(tc, code)
            .ok_or_else(|| InitFailure::Compile("script source is too large".to_string()))?;

        let Some(script) = v8::Script::compile(tc, source, None) else {
            return Err(InitFailure::Compile(describe_exception(tc)));
        };

        if script.run(tc).is_none() {
            return Err(if tc.has_terminated() {
                InitFailure::Terminated
            } else {
                InitFailure::Bootstrap(describe_exception(tc))
            });
        }
    }

    // Let top-level promises and timers registered by the body settle.
    let drained = tokio::select! {
        result = js_runtime.run_event_loop(PollEventLoopOptions::default()) => result,
        Ok(()) = &mut cancel => return Err(InitFailure::Terminated),
    };
    if let Err(e) = drained {
        return Err(if js_runtime.v8_isolate().is_execution_terminating() {
            InitFailure::Terminated
        } else {
            InitFailure::Bootstrap(e.to_string())
        });
    }

    resolve_entry(js_runtime, entry)
}

fn resolve_entry(
    js_runtime: &mut JsRuntime,
    entry: &str,
) -> Result<v8::Global<v8::Function>, InitFailure> {
    let scope = &mut js_runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);

    let context = tc.get_current_context();
    let global = context.global(tc);
    let key = v8::String::new(tc, entry).ok_or(InitFailure::EntryNotFound)?;
    let value = global
        .get(tc, key.into())
        .ok_or(InitFailure::EntryNotFound)?;
    let function =
        v8::Local::<v8::Function>::try_from(value).map_err(|_| InitFailure::EntryNotFound)?;

    Ok(v8::Global::new(tc, function))
}

// ─────────────────────────────────────────────────────────────────────────────
// Invocation
// ─────────────────────────────────────────────────────────────────────────────

/// Call the entry function once and wait for any returned promise.
async fn invoke(
    js_runtime: &mut JsRuntime,
    function: &v8::Global<v8::Function>,
    buffer: Option<ExternalBuffer>,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<(), InvokeFailure> {
    let (called, array) = call_entry(js_runtime, function, buffer);
    let outcome = match called {
        Ok(returned) => settle(js_runtime, &returned, cancel).await,
        Err(failure) => Err(failure),
    };

    // A script that kept the buffer, or left a callback pending, must not
    // reach caller memory after the run.
    detach(js_runtime, &array);
    outcome
}

fn call_entry(
    js_runtime: &mut JsRuntime,
    function: &v8::Global<v8::Function>,
    buffer: Option<ExternalBuffer>,
) -> (
    Result<v8::Global<v8::Value>, InvokeFailure>,
    v8::Global<v8::ArrayBuffer>,
) {
    let scope = &mut js_runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);

    let function = v8::Local::new(tc, function);
    let array = match buffer {
        Some(buffer) => buffer.wrap(tc),
        None => v8::ArrayBuffer::new(tc, 0),
    };
    let context = tc.get_current_context();
    let receiver: v8::Local<v8::Value> = context.global(tc).into();

    let called = match function.call(tc, receiver, &[array.into()]) {
        Some(value) => Ok(v8::Global::new(tc, value)),
        None if tc.has_terminated() => Err(InvokeFailure::Terminated),
        None => Err(InvokeFailure::Exception(describe_exception(tc))),
    };
    (called, v8::Global::new(tc, array))
}

/// Drive the event loop until `returned` settles, or until `cancel` fires.
///
/// Stops as soon as this call's promise settles, so timers left behind by an
/// earlier, cancelled call cannot hold up later ones.
async fn settle(
    js_runtime: &mut JsRuntime,
    returned: &v8::Global<v8::Value>,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<(), InvokeFailure> {
    if let Some(outcome) = promise_outcome(js_runtime, returned) {
        return outcome;
    }

    let settled = poll_fn(|cx| {
        let polled = js_runtime.poll_event_loop(cx, PollEventLoopOptions::default());
        if let Some(outcome) = promise_outcome(js_runtime, returned) {
            return Poll::Ready(outcome);
        }
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => Poll::Ready(Err(InvokeFailure::Exception(
                "Promise still pending after event loop".to_string(),
            ))),
            Poll::Ready(Err(e)) => Poll::Ready(Err(
                if js_runtime.v8_isolate().is_execution_terminating() {
                    InvokeFailure::Terminated
                } else {
                    InvokeFailure::Exception(e.to_string())
                },
            )),
        }
    });

    tokio::select! {
        outcome = settled => outcome,
        Ok(()) = cancel => Err(InvokeFailure::Terminated),
    }
}

fn detach(js_runtime: &mut JsRuntime, array: &v8::Global<v8::ArrayBuffer>) {
    let scope = &mut js_runtime.handle_scope();
    let array = v8::Local::new(scope, array);
    let _ = array.detach(None);
}

/// `None` while the value is a pending promise.
fn promise_outcome(
    js_runtime: &mut JsRuntime,
    value: &v8::Global<v8::Value>,
) -> Option<Result<(), InvokeFailure>> {
    let scope = &mut js_runtime.handle_scope();
    let local = v8::Local::new(scope, value);

    let Ok(promise) = v8::Local::<v8::Promise>::try_from(local) else {
        return Some(Ok(()));
    };
    // Rejections are reported through the run result, not as unhandled.
    promise.mark_as_handled();

    match promise.state() {
        v8::PromiseState::Fulfilled => Some(Ok(())),
        v8::PromiseState::Rejected => {
            let reason = promise.result(scope);
            Some(Err(InvokeFailure::Exception(
                reason.to_rust_string_lossy(scope),
            )))
        }
        v8::PromiseState::Pending => None,
    }
}

/// Render the caught exception with its line number when V8 has one.
fn describe_exception(tc: &mut v8::TryCatch<v8::HandleScope>) -> String {
    let Some(exception) = tc.exception() else {
        return "unknown error".to_string();
    };
    let text = exception.to_rust_string_lossy(tc);
    match tc.message().and_then(|message| message.get_line_number(tc)) {
        Some(line) => format!("{} (line {})", text, line),
        None => text,
    }
}
