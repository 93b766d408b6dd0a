//! Cross-thread dispatcher.
//!
//! Control crosses between the host and the native runtime only through
//! two queues:
//!
//! ```text
//!  host ──WorkerRequest──▶ [ffi worker thread] ──▶ NativeRuntime::bind / set_file_handler
//!  host ◀──HostMessage──── [ffi worker thread]            (Response)
//!  host ◀──HostMessage──── [native thread, trampoline]    (InvokeCallback / InvokeFileHandler)
//! ```
//!
//! The [`worker`] owns callback registration; the [`inbound`] loop runs on
//! the host's tokio runtime and is where handlers are invoked, responses are
//! written back and pending requests are settled.

pub mod inbound;
pub mod worker;

use serde::Serialize;

use crate::error::ProtocolViolation;
use crate::native::{BindInvocation, FileRequest};
use crate::pending::Token;

/// One-shot actions the worker performs on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Bind,
    SetFileHandler,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Bind => "bind",
            Action::SetFileHandler => "setFileHandler",
        }
    }
}

/// Host → worker.
#[derive(Debug, Serialize)]
pub struct WorkerRequest {
    pub token: Token,
    pub action: Action,
    pub payload: serde_json::Value,
}

/// Worker or trampoline → host.
#[derive(Debug)]
pub enum HostMessage {
    /// A native element callback fired for the handler at `callback_index`.
    InvokeCallback {
        callback_index: usize,
        invocation: BindInvocation,
    },
    /// The runtime asked the file handler at `callback_index` for a URL.
    InvokeFileHandler {
        callback_index: usize,
        request: FileRequest,
    },
    /// The worker finished the request identified by `token`.
    Response {
        token: Token,
        outcome: Result<serde_json::Value, ProtocolViolation>,
    },
    /// The worker thread has exited; nothing more will be answered.
    DispatcherStopped,
}
