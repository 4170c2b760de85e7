//! Messages exchanged with an isolate thread.

use tokio::sync::oneshot;

use crate::buffer::ExternalBuffer;

/// Commands sent to the isolate thread.
///
/// Closing the sending side is the shutdown signal.
pub(crate) enum WorkerCommand {
    /// Call the entry function once with `buffer` as its argument.
    Invoke {
        buffer: Option<ExternalBuffer>,
        /// Fired by the watchdog. Wakes the thread if it is parked on the
        /// event loop, where terminating the isolate has no effect.
        cancel: oneshot::Receiver<()>,
        reply: oneshot::Sender<Result<(), InvokeFailure>>,
    },
}

/// Why a single invocation did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InvokeFailure {
    /// Execution was forcibly terminated from another thread.
    Terminated,
    /// The script threw, or its returned promise rejected.
    Exception(String),
}

/// Why an isolate failed to come up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitFailure {
    Compile(String),
    Bootstrap(String),
    EntryNotFound,
    /// The top-level body was terminated by the bootstrap watchdog.
    Terminated,
}
