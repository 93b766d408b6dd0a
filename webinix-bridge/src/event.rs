//! Event context handed to element-bind handlers, and the conversions that
//! turn handler results into something the native runtime can take.

use std::sync::Arc;

use crate::native::{NativeRuntime, WindowHandle};
use crate::window::Window;

/// Kind of UI event, numbered as the native runtime numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Disconnected,
    Connected,
    MouseClick,
    Navigation,
    Callback,
    Unknown(usize),
}

impl From<usize> for EventType {
    fn from(raw: usize) -> Self {
        match raw {
            0 => EventType::Disconnected,
            1 => EventType::Connected,
            2 => EventType::MouseClick,
            3 => EventType::Navigation,
            4 => EventType::Callback,
            other => EventType::Unknown(other),
        }
    }
}

/// Lazy accessor for the arguments of one event.
///
/// Every call goes to the native runtime keyed by `(window, event_number,
/// index)`. Only meaningful while the handler for this event is running.
#[derive(Clone)]
pub struct EventArgs {
    native: Arc<dyn NativeRuntime>,
    window: WindowHandle,
    event_number: usize,
}

impl EventArgs {
    pub(crate) fn new(native: Arc<dyn NativeRuntime>, window: WindowHandle, event_number: usize) -> Self {
        Self {
            native,
            window,
            event_number,
        }
    }

    pub fn number(&self, index: usize) -> i64 {
        self.native.get_int_at(self.window, self.event_number, index)
    }

    pub fn string(&self, index: usize) -> String {
        self.native.get_string_at(self.window, self.event_number, index)
    }

    pub fn boolean(&self, index: usize) -> bool {
        self.native.get_bool_at(self.window, self.event_number, index)
    }
}

impl std::fmt::Debug for EventArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventArgs")
            .field("window", &self.window)
            .field("event_number", &self.event_number)
            .finish()
    }
}

/// One native callback invocation, resolved to its host window.
#[derive(Debug, Clone)]
pub struct Event {
    pub window: Window,
    pub event_type: EventType,
    pub event_number: usize,
    pub element: String,
    pub bind_id: usize,
    pub arg: EventArgs,
}

/// Conversion of a handler's return value into the response string.
pub trait IntoResponse {
    fn into_response(self) -> String;
}

impl IntoResponse for () {
    fn into_response(self) -> String {
        String::new()
    }
}

impl IntoResponse for String {
    fn into_response(self) -> String {
        self
    }
}

impl IntoResponse for &str {
    fn into_response(self) -> String {
        self.to_string()
    }
}

macro_rules! display_response {
    ($($t:ty),*) => {
        $(impl IntoResponse for $t {
            fn into_response(self) -> String {
                self.to_string()
            }
        })*
    };
}

display_response!(bool, i32, i64, u32, u64, usize, f32, f64);

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> String {
        match self {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

impl<T: IntoResponse> IntoResponse for Option<T> {
    fn into_response(self) -> String {
        self.map(IntoResponse::into_response).unwrap_or_default()
    }
}

impl<T: IntoResponse, E: std::fmt::Display> IntoResponse for Result<T, E> {
    fn into_response(self) -> String {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "bind handler failed, answering with empty response");
                String::new()
            }
        }
    }
}

/// Body produced by a file handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileResponse {
    Text(String),
    Bytes(Vec<u8>),
}

impl FileResponse {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileResponse::Text(s) => s.as_bytes(),
            FileResponse::Bytes(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for FileResponse {
    fn from(s: String) -> Self {
        FileResponse::Text(s)
    }
}

impl From<&str> for FileResponse {
    fn from(s: &str) -> Self {
        FileResponse::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileResponse {
    fn from(b: Vec<u8>) -> Self {
        FileResponse::Bytes(b)
    }
}

impl From<&[u8]> for FileResponse {
    fn from(b: &[u8]) -> Self {
        FileResponse::Bytes(b.to_vec())
    }
}
