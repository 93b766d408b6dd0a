//! The native runtime collaborator.
//!
//! [`NativeRuntime`] is the minimum surface of the webinix C ABI the bridge
//! needs. The real binding lives in [`linked`] (feature `linked`); tests use
//! `testing::MockRuntime` (feature `testing`).
//!
//! Callback registration does not take host closures directly: the runtime
//! receives a [`BindTrampoline`] / [`FileHandlerTrampoline`] that only knows
//! how to post a message carrying a callback index back to the host loop.

use std::ffi::c_void;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[cfg(feature = "linked")]
pub mod linked;

/// Opaque window identity issued by the native runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub usize);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An integer as delivered by a native callback.
///
/// Depending on the entry point, the runtime hands over either a 64-bit
/// value or a machine word. Both are normalized to `usize` before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeInt {
    Wide(u64),
    Word(usize),
}

impl NativeInt {
    pub fn normalize(self) -> usize {
        match self {
            NativeInt::Wide(v) => v as usize,
            NativeInt::Word(v) => v,
        }
    }
}

impl From<u64> for NativeInt {
    fn from(v: u64) -> Self {
        NativeInt::Wide(v)
    }
}

impl From<usize> for NativeInt {
    fn from(v: usize) -> Self {
        NativeInt::Word(v)
    }
}

/// Raw arguments of one element-bind callback, as seen on the native thread.
#[derive(Debug, Clone)]
pub struct BindInvocation {
    pub window: NativeInt,
    pub event_type: NativeInt,
    /// `None` when the runtime passed a null element pointer.
    pub element: Option<String>,
    pub event_number: NativeInt,
    pub bind_id: NativeInt,
}

/// Raw arguments of one file-handler request.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub window: NativeInt,
    /// Requested path; `None` on a null pointer.
    pub url: Option<String>,
}

/// Native-callable entry registered for an element binding.
pub type BindTrampoline = Arc<dyn Fn(BindInvocation) + Send + Sync>;

/// Native-callable entry registered for a window's file handler.
pub type FileHandlerTrampoline = Arc<dyn Fn(FileRequest) + Send + Sync>;

/// Global runtime toggles, numbered as the C enum `webinix_config`.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    ShowWaitConnection = 0,
    UiEventBlocking = 1,
    FolderMonitor = 2,
    MultiClient = 3,
    UseCookies = 4,
    AsynchronousResponse = 5,
}

/// Browser selection for [`crate::Window::show_browser`].
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Browser {
    NoBrowser = 0,
    #[default]
    AnyBrowser,
    Chrome,
    Firefox,
    Edge,
    Safari,
    Chromium,
    Opera,
    Brave,
    Vivaldi,
    Epic,
    Yandex,
    ChromiumBased,
}

/// The native library, seen from the bridge.
///
/// Implementations must be callable from any thread. Callback trampolines
/// passed to [`bind`](NativeRuntime::bind) and
/// [`set_file_handler`](NativeRuntime::set_file_handler) are retained for
/// the lifetime of the process.
pub trait NativeRuntime: Send + Sync + 'static {
    // ── window lifecycle ──
    fn new_window(&self) -> WindowHandle;
    fn show(&self, window: WindowHandle, content: &str) -> bool;
    fn show_browser(&self, window: WindowHandle, content: &str, browser: Browser) -> bool;
    fn is_shown(&self, window: WindowHandle) -> bool;
    fn close(&self, window: WindowHandle);
    fn destroy(&self, window: WindowHandle);
    fn set_root_folder(&self, window: WindowHandle, path: &str) -> bool;

    // ── scripting ──
    /// Run `script` and write the NUL-terminated answer into `buffer`.
    fn script(&self, window: WindowHandle, script: &str, timeout_secs: usize, buffer: &mut [u8]) -> bool;
    fn script_client(
        &self,
        window: WindowHandle,
        event_number: usize,
        script: &str,
        timeout_secs: usize,
        buffer: &mut [u8],
    ) -> bool;
    fn run(&self, window: WindowHandle, script: &str);

    // ── callback registration ──
    /// Returns the native bind id.
    fn bind(&self, window: WindowHandle, element: &str, trampoline: BindTrampoline) -> usize;
    fn set_file_handler(&self, window: WindowHandle, trampoline: FileHandlerTrampoline);

    // ── event decoding ──
    fn get_int_at(&self, window: WindowHandle, event_number: usize, index: usize) -> i64;
    fn get_string_at(&self, window: WindowHandle, event_number: usize, index: usize) -> String;
    fn get_bool_at(&self, window: WindowHandle, event_number: usize, index: usize) -> bool;

    // ── response delivery ──
    fn set_response(&self, window: WindowHandle, event_number: usize, response: &str);
    /// Hands `length` bytes at `response` to the runtime, which takes
    /// ownership of the allocation. `response` may be null when `length` is 0.
    fn set_file_handler_response(&self, window: WindowHandle, response: *const c_void, length: usize);

    // ── buffer management ──
    /// Allocates `size` bytes in the runtime's heap. Null on failure.
    fn malloc(&self, size: usize) -> *mut c_void;
    /// # Safety
    ///
    /// `dest` must be a live runtime allocation of at least `count` bytes and
    /// `src` must be readable for `count` bytes.
    unsafe fn memcpy(&self, dest: *mut c_void, src: *const c_void, count: usize);
    /// # Safety
    ///
    /// `ptr` must come from [`malloc`](NativeRuntime::malloc) and not have
    /// been freed or handed off.
    unsafe fn free(&self, ptr: *mut c_void);

    // ── global ──
    fn is_app_running(&self) -> bool;
    fn exit(&self);
    fn clean(&self);
    fn set_config(&self, option: ConfigOption, status: bool);
    fn set_timeout(&self, seconds: usize);
    fn set_tls_certificate(&self, certificate_pem: &str, private_key_pem: &str) -> bool;
    fn set_default_root_folder(&self, path: &str) -> bool;
}
