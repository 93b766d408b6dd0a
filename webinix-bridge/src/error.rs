//! Error taxonomy for the bridge.
//!
//! Two families are kept apart: [`BridgeError`] is what user-facing
//! operations return, while [`ProtocolViolation`] marks a defect inside the
//! bridge itself (its tables disagree with what the native runtime sent).

use crate::native::WindowHandle;

/// Which indirection table a callback index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallbackKind {
    ElementBind,
    FileHandler,
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackKind::ElementBind => f.write_str("element-bind"),
            CallbackKind::FileHandler => f.write_str("file-handler"),
        }
    }
}

/// Internal-consistency failures. Never caused by user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// A response arrived for a token that is not outstanding.
    #[error("response for unknown request token {0}")]
    UnknownToken(String),
    /// A native trampoline referenced an index that was never registered.
    #[error("no {kind} callback registered at index {index}")]
    MissingCallback { kind: CallbackKind, index: usize },
    /// An event referenced a window the registry does not know.
    #[error("event for unregistered window {0}")]
    UnknownWindow(WindowHandle),
    /// The worker could not decode a request payload.
    #[error("malformed `{action}` payload: {reason}")]
    MalformedPayload { action: &'static str, reason: String },
}

/// Errors returned to host code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The window never reported itself as shown within the polling budget.
    #[error("unable to connect to the browser after {attempts} attempts")]
    ConnectionTimeout { attempts: u32 },
    /// A boolean-returning native entry point reported failure.
    #[error("native call `{operation}` failed")]
    NativeCall { operation: &'static str },
    /// The UI answered a script with an error; carries the client text.
    #[error("script failed: {0}")]
    Script(String),
    /// The FFI worker is gone; no request can be served.
    #[error("dispatcher unavailable")]
    DispatcherUnavailable,
    /// The native allocator returned null.
    #[error("native allocation of {0} bytes failed")]
    AllocationFailed(usize),
    /// The bridge was started outside of a tokio runtime.
    #[error("bridge must be started from within a tokio runtime")]
    NoRuntime,
    #[error("invalid config: {0}")]
    Config(String),
    #[error("bridge protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl BridgeError {
    /// True when the error signals a bridge defect rather than a
    /// condition the caller can correct or retry.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BridgeError::Protocol(_))
    }
}
