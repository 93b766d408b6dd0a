//! Host-side message loop.
//!
//! Messages are taken one at a time. Handler invocations are spawned as
//! separate tasks so several UI events can be in flight at once; each task
//! writes its own response once its handler has finished. The native side
//! correlates responses by `(window, event_number)`, not by order.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::HostMessage;
use crate::buffer;
use crate::callbacks::HandlerFuture;
use crate::core::Shared;
use crate::error::ProtocolViolation;
use crate::event::{Event, EventArgs, EventType, FileResponse};
use crate::native::{BindInvocation, FileRequest, WindowHandle};

pub(crate) async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<HostMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            HostMessage::InvokeCallback {
                callback_index,
                invocation,
            } => {
                let shared = shared.clone();
                tokio::spawn(async move { invoke_callback(&shared, callback_index, invocation).await });
            }
            HostMessage::InvokeFileHandler {
                callback_index,
                request,
            } => {
                let shared = shared.clone();
                tokio::spawn(async move { invoke_file_handler(&shared, callback_index, request).await });
            }
            HostMessage::Response { token, outcome } => {
                tracing::trace!(%token, ok = outcome.is_ok(), "worker response");
                let outcome = outcome.map_err(Into::into);
                if let Err(violation) = shared.pending.resolve(&token, outcome) {
                    tracing::error!(%violation, "bridge protocol violation");
                }
            }
            HostMessage::DispatcherStopped => {
                tracing::error!("ffi worker stopped, failing outstanding requests");
                shared.pending.close();
            }
        }
    }
    shared.pending.close();
}

/// Run a handler future in its own task so a panicking handler still lets
/// the caller answer the native side.
async fn settle<T: Send + 'static>(future: HandlerFuture<T>) -> Option<T> {
    match tokio::spawn(future).await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!("handler task failed: {e}");
            None
        }
    }
}

async fn invoke_callback(shared: &Shared, callback_index: usize, invocation: BindInvocation) {
    let window = WindowHandle(invocation.window.normalize());
    let event_number = invocation.event_number.normalize();

    let response = match start_callback(shared, callback_index, invocation) {
        Ok(future) => settle(future).await.unwrap_or_default(),
        Err(violation) => {
            tracing::error!(%violation, window = %window, event_number, "cannot dispatch native callback");
            String::new()
        }
    };

    tracing::trace!(window = %window, event_number, len = response.len(), "set response");
    shared.native.set_response(window, event_number, &response);
}

fn start_callback(
    shared: &Shared,
    callback_index: usize,
    invocation: BindInvocation,
) -> Result<HandlerFuture<String>, ProtocolViolation> {
    let handle = WindowHandle(invocation.window.normalize());
    let event_number = invocation.event_number.normalize();
    let event_type = EventType::from(invocation.event_type.normalize());

    let window = shared
        .windows
        .get(handle)
        .ok_or(ProtocolViolation::UnknownWindow(handle))?;
    if event_type == EventType::Disconnected {
        window.mark_disconnected();
    }

    let event = Event {
        window,
        event_type,
        event_number,
        element: invocation.element.unwrap_or_default(),
        bind_id: invocation.bind_id.normalize(),
        arg: EventArgs::new(shared.native.clone(), handle, event_number),
    };
    tracing::trace!(window = %handle, event_number, callback_index, ?event_type, "invoke callback");
    shared.callbacks.bind.invoke(callback_index, event)
}

async fn invoke_file_handler(shared: &Shared, callback_index: usize, request: FileRequest) {
    let window = WindowHandle(request.window.normalize());
    let path = request.url.unwrap_or_default();

    let body = match shared.base_url.join(&path) {
        Ok(url) => match shared.callbacks.file.invoke(callback_index, url) {
            Ok(future) => settle(future).await.unwrap_or(FileResponse::Bytes(Vec::new())),
            Err(violation) => {
                tracing::error!(%violation, window = %window, "cannot dispatch file request");
                FileResponse::Bytes(Vec::new())
            }
        },
        Err(e) => {
            tracing::warn!(window = %window, path = %path, "unparseable file request url: {e}");
            FileResponse::Bytes(Vec::new())
        }
    };

    if let Err(e) = buffer::deliver_file_response(shared.native.as_ref(), window, body.as_bytes()) {
        tracing::error!(window = %window, "file response handoff failed: {e}");
    }
}
