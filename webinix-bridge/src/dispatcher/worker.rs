//! FFI worker thread.
//!
//! The only place that calls the runtime's callback-registration entry
//! points. For each registration it hands the runtime a trampoline that
//! captures nothing but a callback index and a queue sender, so native
//! threads never touch host handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::{Action, HostMessage, WorkerRequest};
use crate::error::{BridgeError, ProtocolViolation};
use crate::native::{BindTrampoline, FileHandlerTrampoline, NativeRuntime, WindowHandle};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindPayload {
    window_id: WindowHandle,
    element_id: String,
    callback_index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileHandlerPayload {
    window_id: WindowHandle,
    callback_index: usize,
}

struct Worker {
    native: Arc<dyn NativeRuntime>,
    host_tx: mpsc::UnboundedSender<HostMessage>,
}

/// Start the worker thread. Returns the queue that feeds it.
///
/// When the thread exits, for any reason, it posts
/// [`HostMessage::DispatcherStopped`] after its request queue is closed.
pub(crate) fn spawn(
    native: Arc<dyn NativeRuntime>,
    host_tx: mpsc::UnboundedSender<HostMessage>,
) -> Result<mpsc::UnboundedSender<WorkerRequest>, BridgeError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Worker {
        native,
        host_tx: host_tx.clone(),
    };

    std::thread::Builder::new()
        .name("webinix-ffi-worker".to_string())
        .spawn(move || {
            tracing::debug!("ffi worker started");
            // `rx` is dropped inside, before the stop notice goes out.
            match std::panic::catch_unwind(AssertUnwindSafe(move || worker.run(rx))) {
                Ok(()) => tracing::debug!("ffi worker stopped"),
                Err(_) => tracing::error!("ffi worker panicked"),
            }
            let _ = host_tx.send(HostMessage::DispatcherStopped);
        })
        .map_err(|e| {
            tracing::error!("failed to spawn ffi worker: {e}");
            BridgeError::DispatcherUnavailable
        })?;

    Ok(tx)
}

fn decode<T: DeserializeOwned>(action: Action, payload: serde_json::Value) -> Result<T, ProtocolViolation> {
    serde_json::from_value(payload).map_err(|e| ProtocolViolation::MalformedPayload {
        action: action.name(),
        reason: e.to_string(),
    })
}

impl Worker {
    fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerRequest>) {
        while let Some(request) = rx.blocking_recv() {
            self.handle(request);
        }
    }

    fn handle(&self, request: WorkerRequest) {
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Ok(json) = serde_json::to_string(&request) {
                tracing::trace!(request = %json, "worker request");
            }
        }
        let WorkerRequest {
            token,
            action,
            payload,
        } = request;

        let outcome = match action {
            Action::Bind => self.bind(payload),
            Action::SetFileHandler => self.set_file_handler(payload),
        };
        if let Err(violation) = &outcome {
            tracing::error!(%token, %violation, "worker could not serve request");
        }

        if self.host_tx.send(HostMessage::Response { token, outcome }).is_err() {
            tracing::warn!("host loop gone, response dropped");
        }
    }

    fn bind(&self, payload: serde_json::Value) -> Result<serde_json::Value, ProtocolViolation> {
        let payload: BindPayload = decode(Action::Bind, payload)?;
        let callback_index = payload.callback_index;
        let host_tx = self.host_tx.clone();
        let trampoline: BindTrampoline = Arc::new(move |invocation| {
            let message = HostMessage::InvokeCallback {
                callback_index,
                invocation,
            };
            if host_tx.send(message).is_err() {
                tracing::warn!(callback_index, "host loop gone, dropping native callback");
            }
        });

        let bind_id = self
            .native
            .bind(payload.window_id, &payload.element_id, trampoline);
        tracing::debug!(
            window = %payload.window_id,
            element = %payload.element_id,
            callback_index,
            bind_id,
            "element bound"
        );
        Ok(json!({ "bindId": bind_id }))
    }

    fn set_file_handler(&self, payload: serde_json::Value) -> Result<serde_json::Value, ProtocolViolation> {
        let payload: FileHandlerPayload = decode(Action::SetFileHandler, payload)?;
        let callback_index = payload.callback_index;
        let host_tx = self.host_tx.clone();
        let trampoline: FileHandlerTrampoline = Arc::new(move |request| {
            let message = HostMessage::InvokeFileHandler {
                callback_index,
                request,
            };
            if host_tx.send(message).is_err() {
                tracing::warn!(callback_index, "host loop gone, dropping file request");
            }
        });

        self.native.set_file_handler(payload.window_id, trampoline);
        tracing::debug!(window = %payload.window_id, callback_index, "file handler set");
        Ok(serde_json::Value::Null)
    }
}
