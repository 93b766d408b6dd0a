//! `extern "C"` binding to `libwebinix-2`.
//!
//! The runtime calls back through two fixed trampolines. Neither carries a
//! user-data pointer, so each looks up its route in a process-lifetime
//! table keyed by what the runtime does pass back. Element bindings are
//! routed by window and native bind id, with `(window, element)` covering the
//! window between registration and the id coming back. A binding on the
//! empty element receives events carrying the id of whatever element was
//! hit, so `(window, "")` is the last fallback. File handlers are routed by
//! `window`. Routes are never removed.

use std::ffi::{c_char, c_int, c_void, CStr, CString};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::{
    BindInvocation, BindTrampoline, Browser, ConfigOption, FileHandlerTrampoline, FileRequest,
    NativeInt, NativeRuntime, WindowHandle,
};

type RawBindCallback = extern "C" fn(
    window: usize,
    event_type: usize,
    element: *mut c_char,
    event_number: usize,
    bind_id: usize,
);

type RawFileHandler =
    extern "C" fn(window: usize, filename: *const c_char, length: *mut c_int) -> *const c_void;

#[link(name = "webinix-2")]
unsafe extern "C" {
    fn webinix_new_window() -> usize;
    fn webinix_show(window: usize, content: *const c_char) -> bool;
    fn webinix_show_browser(window: usize, content: *const c_char, browser: usize) -> bool;
    fn webinix_is_shown(window: usize) -> bool;
    fn webinix_close(window: usize);
    fn webinix_destroy(window: usize);
    fn webinix_set_root_folder(window: usize, path: *const c_char) -> bool;
    fn webinix_script(
        window: usize,
        script: *const c_char,
        timeout: usize,
        buffer: *mut c_char,
        buffer_length: usize,
    ) -> bool;
    fn webinix_interface_script_client(
        window: usize,
        event_number: usize,
        script: *const c_char,
        timeout: usize,
        buffer: *mut c_char,
        buffer_length: usize,
    ) -> bool;
    fn webinix_run(window: usize, script: *const c_char);
    fn webinix_interface_bind(window: usize, element: *const c_char, func: RawBindCallback) -> usize;
    fn webinix_set_file_handler_window(window: usize, handler: RawFileHandler);
    fn webinix_interface_get_int_at(window: usize, event_number: usize, index: usize) -> i64;
    fn webinix_interface_get_string_at(window: usize, event_number: usize, index: usize) -> *const c_char;
    fn webinix_interface_get_bool_at(window: usize, event_number: usize, index: usize) -> bool;
    fn webinix_interface_set_response(window: usize, event_number: usize, response: *const c_char);
    fn webinix_interface_set_response_file_handler(window: usize, response: *const c_void, length: c_int);
    fn webinix_malloc(size: usize) -> *mut c_void;
    fn webinix_memcpy(dest: *mut c_void, src: *mut c_void, count: usize);
    fn webinix_free(ptr: *mut c_void);
    fn webinix_interface_is_app_running() -> bool;
    fn webinix_exit();
    fn webinix_clean();
    fn webinix_set_config(option: usize, status: bool);
    fn webinix_set_timeout(second: usize);
    fn webinix_set_tls_certificate(certificate_pem: *const c_char, private_key_pem: *const c_char) -> bool;
    fn webinix_set_default_root_folder(path: *const c_char) -> bool;
}

static BIND_ROUTES: Lazy<DashMap<(usize, String), BindTrampoline>> = Lazy::new(DashMap::new);
static BIND_ID_ROUTES: Lazy<DashMap<(usize, usize), BindTrampoline>> = Lazy::new(DashMap::new);
static FILE_HANDLER_ROUTES: Lazy<DashMap<usize, FileHandlerTrampoline>> = Lazy::new(DashMap::new);

/// Read a C string pointer into an owned String, returning None on null.
unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Convert to a C string, truncating at the first interior NUL.
fn c_string(s: &str) -> CString {
    match CString::new(s) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("string passed to webinix contained interior NUL byte, truncating");
            let head = &s[..e.nul_position()];
            CString::new(head).unwrap_or_default()
        }
    }
}

/// Length of the text the runtime wrote into a host buffer.
fn text_len(buffer: &[u8]) -> usize {
    buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len())
}

fn bind_route(window: usize, element: &str, bind_id: usize) -> Option<BindTrampoline> {
    if let Some(route) = BIND_ID_ROUTES.get(&(window, bind_id)) {
        return Some(route.clone());
    }
    BIND_ROUTES
        .get(&(window, element.to_string()))
        .or_else(|| BIND_ROUTES.get(&(window, String::new())))
        .map(|r| r.clone())
}

extern "C" fn bind_trampoline(
    window: usize,
    event_type: usize,
    element: *mut c_char,
    event_number: usize,
    bind_id: usize,
) {
    let element = unsafe { read_c_str(element) };
    let Some(route) = bind_route(window, element.as_deref().unwrap_or_default(), bind_id) else {
        tracing::error!(
            window,
            bind_id,
            element = element.as_deref().unwrap_or_default(),
            "native bind callback without a registered route"
        );
        return;
    };
    route(BindInvocation {
        window: NativeInt::Word(window),
        event_type: NativeInt::Word(event_type),
        element,
        event_number: NativeInt::Word(event_number),
        bind_id: NativeInt::Word(bind_id),
    });
}

extern "C" fn file_handler_trampoline(
    window: usize,
    filename: *const c_char,
    length: *mut c_int,
) -> *const c_void {
    if !length.is_null() {
        unsafe { *length = 0 };
    }
    let url = unsafe { read_c_str(filename) };
    match FILE_HANDLER_ROUTES.get(&window).map(|r| r.clone()) {
        Some(route) => route(FileRequest {
            window: NativeInt::Word(window),
            url,
        }),
        None => tracing::error!(window, "native file handler callback without a registered route"),
    }
    // Asynchronous response mode: the answer arrives through
    // `webinix_interface_set_response_file_handler`.
    std::ptr::null()
}

/// The real native runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedRuntime;

impl NativeRuntime for LinkedRuntime {
    fn new_window(&self) -> WindowHandle {
        WindowHandle(unsafe { webinix_new_window() })
    }

    fn show(&self, window: WindowHandle, content: &str) -> bool {
        let content = c_string(content);
        unsafe { webinix_show(window.0, content.as_ptr()) }
    }

    fn show_browser(&self, window: WindowHandle, content: &str, browser: Browser) -> bool {
        let content = c_string(content);
        unsafe { webinix_show_browser(window.0, content.as_ptr(), browser as usize) }
    }

    fn is_shown(&self, window: WindowHandle) -> bool {
        unsafe { webinix_is_shown(window.0) }
    }

    fn close(&self, window: WindowHandle) {
        unsafe { webinix_close(window.0) }
    }

    fn destroy(&self, window: WindowHandle) {
        unsafe { webinix_destroy(window.0) }
    }

    fn set_root_folder(&self, window: WindowHandle, path: &str) -> bool {
        let path = c_string(path);
        unsafe { webinix_set_root_folder(window.0, path.as_ptr()) }
    }

    fn script(&self, window: WindowHandle, script: &str, timeout_secs: usize, buffer: &mut [u8]) -> bool {
        let script = c_string(script);
        let ok = unsafe {
            webinix_script(
                window.0,
                script.as_ptr(),
                timeout_secs,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        tracing::trace!(window = %window, ok, len = text_len(buffer), "script returned");
        ok
    }

    fn script_client(
        &self,
        window: WindowHandle,
        event_number: usize,
        script: &str,
        timeout_secs: usize,
        buffer: &mut [u8],
    ) -> bool {
        let script = c_string(script);
        unsafe {
            webinix_interface_script_client(
                window.0,
                event_number,
                script.as_ptr(),
                timeout_secs,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        }
    }

    fn run(&self, window: WindowHandle, script: &str) {
        let script = c_string(script);
        unsafe { webinix_run(window.0, script.as_ptr()) }
    }

    fn bind(&self, window: WindowHandle, element: &str, trampoline: BindTrampoline) -> usize {
        BIND_ROUTES.insert((window.0, element.to_string()), trampoline.clone());
        let element = c_string(element);
        let bind_id = unsafe { webinix_interface_bind(window.0, element.as_ptr(), bind_trampoline) };
        BIND_ID_ROUTES.insert((window.0, bind_id), trampoline);
        bind_id
    }

    fn set_file_handler(&self, window: WindowHandle, trampoline: FileHandlerTrampoline) {
        FILE_HANDLER_ROUTES.insert(window.0, trampoline);
        unsafe { webinix_set_file_handler_window(window.0, file_handler_trampoline) }
    }

    fn get_int_at(&self, window: WindowHandle, event_number: usize, index: usize) -> i64 {
        unsafe { webinix_interface_get_int_at(window.0, event_number, index) }
    }

    fn get_string_at(&self, window: WindowHandle, event_number: usize, index: usize) -> String {
        let ptr = unsafe { webinix_interface_get_string_at(window.0, event_number, index) };
        unsafe { read_c_str(ptr) }.unwrap_or_default()
    }

    fn get_bool_at(&self, window: WindowHandle, event_number: usize, index: usize) -> bool {
        unsafe { webinix_interface_get_bool_at(window.0, event_number, index) }
    }

    fn set_response(&self, window: WindowHandle, event_number: usize, response: &str) {
        let response = c_string(response);
        unsafe { webinix_interface_set_response(window.0, event_number, response.as_ptr()) }
    }

    fn set_file_handler_response(&self, window: WindowHandle, response: *const c_void, length: usize) {
        let length = c_int::try_from(length).unwrap_or(c_int::MAX);
        unsafe { webinix_interface_set_response_file_handler(window.0, response, length) }
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        unsafe { webinix_malloc(size) }
    }

    unsafe fn memcpy(&self, dest: *mut c_void, src: *const c_void, count: usize) {
        unsafe { webinix_memcpy(dest, src.cast_mut(), count) }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        unsafe { webinix_free(ptr) }
    }

    fn is_app_running(&self) -> bool {
        unsafe { webinix_interface_is_app_running() }
    }

    fn exit(&self) {
        unsafe { webinix_exit() }
    }

    fn clean(&self) {
        unsafe { webinix_clean() }
    }

    fn set_config(&self, option: ConfigOption, status: bool) {
        unsafe { webinix_set_config(option as usize, status) }
    }

    fn set_timeout(&self, seconds: usize) {
        unsafe { webinix_set_timeout(seconds) }
    }

    fn set_tls_certificate(&self, certificate_pem: &str, private_key_pem: &str) -> bool {
        let cert = c_string(certificate_pem);
        let key = c_string(private_key_pem);
        unsafe { webinix_set_tls_certificate(cert.as_ptr(), key.as_ptr()) }
    }

    fn set_default_root_folder(&self, path: &str) -> bool {
        let path = c_string(path);
        unsafe { webinix_set_default_root_folder(path.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn c_string_truncates_at_interior_nul() {
        assert_eq!(c_string("abc\0def").as_bytes(), b"abc");
        assert_eq!(c_string("plain").as_bytes(), b"plain");
    }

    #[test]
    fn read_null_is_none() {
        assert!(unsafe { read_c_str(std::ptr::null()) }.is_none());
    }

    fn counting_route(hits: &Arc<AtomicUsize>) -> BindTrampoline {
        let hits = hits.clone();
        Arc::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn window_wide_binding_receives_events_for_concrete_elements() {
        let hits = Arc::new(AtomicUsize::new(0));
        BIND_ROUTES.insert((9001, String::new()), counting_route(&hits));

        let route = bind_route(9001, "btn", usize::MAX - 1).expect("falls back to the window-wide route");
        route(BindInvocation {
            window: NativeInt::Word(9001),
            event_type: NativeInt::Word(4),
            element: Some("btn".into()),
            event_number: NativeInt::Word(1),
            bind_id: NativeInt::Word(usize::MAX - 1),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bind_route(9002, "btn", usize::MAX - 1).is_none());
    }

    #[test]
    fn bind_id_takes_precedence_over_element() {
        let by_id = Arc::new(AtomicUsize::new(0));
        let by_element = Arc::new(AtomicUsize::new(0));
        BIND_ID_ROUTES.insert((9003, 7), counting_route(&by_id));
        BIND_ROUTES.insert((9003, "go".into()), counting_route(&by_element));

        let route = bind_route(9003, "go", 7).expect("route by id");
        route(BindInvocation {
            window: NativeInt::Word(9003),
            event_type: NativeInt::Word(4),
            element: Some("go".into()),
            event_number: NativeInt::Word(1),
            bind_id: NativeInt::Word(7),
        });
        assert_eq!(by_id.load(Ordering::SeqCst), 1);
        assert_eq!(by_element.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn text_len_stops_at_nul() {
        assert_eq!(text_len(b"ok\0garbage"), 2);
        assert_eq!(text_len(b"full"), 4);
    }
}
