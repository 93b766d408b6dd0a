//! In-memory [`NativeRuntime`] for tests.
//!
//! Records every call, keeps registered trampolines so tests can fire them
//! the way a native thread would, and backs `malloc`/`memcpy`/`free` with
//! real heap buffers so the response-buffer handoff can be checked byte for
//! byte.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::native::{
    BindInvocation, BindTrampoline, Browser, ConfigOption, FileHandlerTrampoline, FileRequest,
    NativeInt, NativeRuntime, WindowHandle,
};

/// A canned event argument.
#[derive(Debug, Clone, PartialEq)]
pub enum MockArg {
    Int(i64),
    Str(String),
    Bool(bool),
}

struct Binding {
    window: WindowHandle,
    element: String,
    trampoline: BindTrampoline,
}

#[derive(Default)]
struct State {
    bindings: Vec<Binding>,
    file_handlers: HashMap<WindowHandle, FileHandlerTrampoline>,
    args: HashMap<(WindowHandle, usize), Vec<MockArg>>,
    shown_polls: HashMap<WindowHandle, u32>,
    responses: VecDeque<(WindowHandle, usize, String)>,
    file_responses: Vec<(WindowHandle, Vec<u8>)>,
    allocations: HashMap<usize, Box<[u8]>>,
    malloc_sizes: Vec<usize>,
    config: Vec<(ConfigOption, bool)>,
    shows: Vec<(WindowHandle, String)>,
    closed: Vec<WindowHandle>,
    destroyed: Vec<WindowHandle>,
    scripts: Vec<(WindowHandle, Option<usize>, String)>,
    script_answer: Option<(bool, String)>,
    root_folders: Vec<(Option<WindowHandle>, String)>,
}

/// Test double for the native library.
pub struct MockRuntime {
    state: Mutex<State>,
    response_ready: Notify,
    next_window: AtomicUsize,
    /// `is_shown` answers false this many times per window, then true.
    /// `u32::MAX` means never.
    shown_after: AtomicU32,
    show_result: AtomicBool,
    app_running: AtomicBool,
    app_running_polls: AtomicUsize,
    fail_allocations: AtomicBool,
    memcpy_calls: AtomicUsize,
    free_calls: AtomicUsize,
    native_call_result: AtomicBool,
    panic_on_bind: AtomicBool,
    exits: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            response_ready: Notify::new(),
            next_window: AtomicUsize::new(1),
            shown_after: AtomicU32::new(0),
            show_result: AtomicBool::new(true),
            app_running: AtomicBool::new(true),
            app_running_polls: AtomicUsize::new(0),
            fail_allocations: AtomicBool::new(false),
            memcpy_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
            native_call_result: AtomicBool::new(true),
            panic_on_bind: AtomicBool::new(false),
            exits: AtomicUsize::new(0),
        }
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ── knobs ──

    pub fn shown_after(&self, polls: u32) {
        self.shown_after.store(polls, Ordering::SeqCst);
    }

    pub fn never_shown(&self) {
        self.shown_after(u32::MAX);
    }

    pub fn show_succeeds(&self, ok: bool) {
        self.show_result.store(ok, Ordering::SeqCst);
    }

    pub fn set_app_running(&self, running: bool) {
        self.app_running.store(running, Ordering::SeqCst);
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Result of boolean setup calls (root folder, TLS certificate).
    pub fn native_calls_succeed(&self, ok: bool) {
        self.native_call_result.store(ok, Ordering::SeqCst);
    }

    /// Make the next `bind` panic, killing the thread that called it.
    pub fn panic_on_bind(&self, panic: bool) {
        self.panic_on_bind.store(panic, Ordering::SeqCst);
    }

    pub fn answer_scripts(&self, ok: bool, text: &str) {
        self.state.lock().script_answer = Some((ok, text.to_string()));
    }

    pub fn set_args(&self, window: WindowHandle, event_number: usize, args: Vec<MockArg>) {
        self.state.lock().args.insert((window, event_number), args);
    }

    // ── simulated native callbacks ──

    /// Fire the trampoline bound to `(window, element)` the way the native
    /// runtime would. Without an exact binding, a window-wide binding on the
    /// empty element receives the event, still carrying `element`.
    /// Integers are delivered in their 64-bit encoding. Returns false when
    /// nothing is bound there.
    pub fn fire(&self, window: WindowHandle, element: &str, event_type: usize, event_number: usize) -> bool {
        let found = {
            let state = self.state.lock();
            let bound = |name: &str| {
                state
                    .bindings
                    .iter()
                    .enumerate()
                    .find(|(_, b)| b.window == window && b.element == name)
                    .map(|(id, b)| (id, b.trampoline.clone()))
            };
            bound(element).or_else(|| bound(""))
        };
        let Some((bind_id, trampoline)) = found else {
            return false;
        };
        trampoline(BindInvocation {
            window: NativeInt::Wide(window.0 as u64),
            event_type: NativeInt::Wide(event_type as u64),
            element: Some(element.to_string()),
            event_number: NativeInt::Wide(event_number as u64),
            bind_id: NativeInt::Word(bind_id),
        });
        true
    }

    /// Fire the trampoline registered under native bind id `bind_id` with a
    /// hand-built invocation.
    pub fn fire_raw(&self, bind_id: usize, invocation: BindInvocation) -> bool {
        let trampoline = self.state.lock().bindings.get(bind_id).map(|b| b.trampoline.clone());
        match trampoline {
            Some(t) => {
                t(invocation);
                true
            }
            None => false,
        }
    }

    /// Ask the file handler of `window` for `url`.
    pub fn request_file(&self, window: WindowHandle, url: &str) -> bool {
        let trampoline = self.state.lock().file_handlers.get(&window).cloned();
        match trampoline {
            Some(t) => {
                t(FileRequest {
                    window: NativeInt::Word(window.0),
                    url: Some(url.to_string()),
                });
                true
            }
            None => false,
        }
    }

    // ── observations ──

    /// Wait for the next `set_response` call.
    pub async fn next_response(&self) -> (WindowHandle, usize, String) {
        loop {
            let ready = self.response_ready.notified();
            if let Some(r) = self.state.lock().responses.pop_front() {
                return r;
            }
            ready.await;
        }
    }

    /// Wait until `count` file-handler responses have been delivered.
    pub async fn wait_file_responses(&self, count: usize) -> Vec<(WindowHandle, Vec<u8>)> {
        loop {
            let ready = self.response_ready.notified();
            {
                let state = self.state.lock();
                if state.file_responses.len() >= count {
                    return state.file_responses.clone();
                }
            }
            ready.await;
        }
    }

    pub fn pending_responses(&self) -> usize {
        self.state.lock().responses.len()
    }

    pub fn file_responses(&self) -> Vec<(WindowHandle, Vec<u8>)> {
        self.state.lock().file_responses.clone()
    }

    pub fn bindings(&self) -> Vec<(WindowHandle, String)> {
        self.state
            .lock()
            .bindings
            .iter()
            .map(|b| (b.window, b.element.clone()))
            .collect()
    }

    pub fn has_file_handler(&self, window: WindowHandle) -> bool {
        self.state.lock().file_handlers.contains_key(&window)
    }

    pub fn malloc_sizes(&self) -> Vec<usize> {
        self.state.lock().malloc_sizes.clone()
    }

    pub fn memcpy_calls(&self) -> usize {
        self.memcpy_calls.load(Ordering::SeqCst)
    }

    pub fn free_calls(&self) -> usize {
        self.free_calls.load(Ordering::SeqCst)
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn config_calls(&self) -> Vec<(ConfigOption, bool)> {
        self.state.lock().config.clone()
    }

    pub fn shown_polls(&self, window: WindowHandle) -> u32 {
        self.state.lock().shown_polls.get(&window).copied().unwrap_or(0)
    }

    pub fn app_running_polls(&self) -> usize {
        self.app_running_polls.load(Ordering::SeqCst)
    }

    pub fn shows(&self) -> Vec<(WindowHandle, String)> {
        self.state.lock().shows.clone()
    }

    pub fn closed(&self) -> Vec<WindowHandle> {
        self.state.lock().closed.clone()
    }

    pub fn destroyed(&self) -> Vec<WindowHandle> {
        self.state.lock().destroyed.clone()
    }

    pub fn scripts(&self) -> Vec<(WindowHandle, Option<usize>, String)> {
        self.state.lock().scripts.clone()
    }

    pub fn root_folders(&self) -> Vec<(Option<WindowHandle>, String)> {
        self.state.lock().root_folders.clone()
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }

    fn arg(&self, window: WindowHandle, event_number: usize, index: usize) -> Option<MockArg> {
        self.state
            .lock()
            .args
            .get(&(window, event_number))
            .and_then(|args| args.get(index).cloned())
    }

    fn answer_script(&self, window: WindowHandle, client: Option<usize>, script: &str, buffer: &mut [u8]) -> bool {
        let mut state = self.state.lock();
        state.scripts.push((window, client, script.to_string()));
        let (ok, text) = state.script_answer.clone().unwrap_or((true, String::new()));
        let n = text.len().min(buffer.len().saturating_sub(1));
        buffer[..n].copy_from_slice(&text.as_bytes()[..n]);
        if n < buffer.len() {
            buffer[n] = 0;
        }
        ok
    }
}

impl NativeRuntime for MockRuntime {
    fn new_window(&self) -> WindowHandle {
        WindowHandle(self.next_window.fetch_add(1, Ordering::SeqCst))
    }

    fn show(&self, window: WindowHandle, content: &str) -> bool {
        self.state.lock().shows.push((window, content.to_string()));
        self.show_result.load(Ordering::SeqCst)
    }

    fn show_browser(&self, window: WindowHandle, content: &str, _browser: Browser) -> bool {
        self.show(window, content)
    }

    fn is_shown(&self, window: WindowHandle) -> bool {
        let threshold = self.shown_after.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let polls = state.shown_polls.entry(window).or_insert(0);
        let before = *polls;
        *polls += 1;
        threshold != u32::MAX && before >= threshold
    }

    fn close(&self, window: WindowHandle) {
        self.state.lock().closed.push(window);
    }

    fn destroy(&self, window: WindowHandle) {
        self.state.lock().destroyed.push(window);
    }

    fn set_root_folder(&self, window: WindowHandle, path: &str) -> bool {
        self.state.lock().root_folders.push((Some(window), path.to_string()));
        self.native_call_result.load(Ordering::SeqCst)
    }

    fn script(&self, window: WindowHandle, script: &str, _timeout_secs: usize, buffer: &mut [u8]) -> bool {
        self.answer_script(window, None, script, buffer)
    }

    fn script_client(
        &self,
        window: WindowHandle,
        event_number: usize,
        script: &str,
        _timeout_secs: usize,
        buffer: &mut [u8],
    ) -> bool {
        self.answer_script(window, Some(event_number), script, buffer)
    }

    fn run(&self, window: WindowHandle, script: &str) {
        self.state.lock().scripts.push((window, None, script.to_string()));
    }

    fn bind(&self, window: WindowHandle, element: &str, trampoline: BindTrampoline) -> usize {
        if self.panic_on_bind.load(Ordering::SeqCst) {
            panic!("mock runtime: bind failed hard");
        }
        let mut state = self.state.lock();
        state.bindings.push(Binding {
            window,
            element: element.to_string(),
            trampoline,
        });
        state.bindings.len() - 1
    }

    fn set_file_handler(&self, window: WindowHandle, trampoline: FileHandlerTrampoline) {
        self.state.lock().file_handlers.insert(window, trampoline);
    }

    fn get_int_at(&self, window: WindowHandle, event_number: usize, index: usize) -> i64 {
        match self.arg(window, event_number, index) {
            Some(MockArg::Int(v)) => v,
            _ => 0,
        }
    }

    fn get_string_at(&self, window: WindowHandle, event_number: usize, index: usize) -> String {
        match self.arg(window, event_number, index) {
            Some(MockArg::Str(s)) => s,
            _ => String::new(),
        }
    }

    fn get_bool_at(&self, window: WindowHandle, event_number: usize, index: usize) -> bool {
        matches!(self.arg(window, event_number, index), Some(MockArg::Bool(true)))
    }

    fn set_response(&self, window: WindowHandle, event_number: usize, response: &str) {
        self.state
            .lock()
            .responses
            .push_back((window, event_number, response.to_string()));
        self.response_ready.notify_one();
    }

    fn set_file_handler_response(&self, window: WindowHandle, response: *const c_void, length: usize) {
        let body = if length == 0 {
            Vec::new()
        } else {
            let state = self.state.lock();
            let Some(buf) = state.allocations.get(&(response as usize)) else {
                panic!("mock runtime: file response does not point at a native allocation");
            };
            assert!(length <= buf.len(), "mock runtime: response longer than its allocation");
            buf[..length].to_vec()
        };
        self.state.lock().file_responses.push((window, body));
        self.response_ready.notify_one();
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return std::ptr::null_mut();
        }
        let mut buf = vec![0u8; size.max(1)].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        let mut state = self.state.lock();
        state.malloc_sizes.push(size);
        state.allocations.insert(ptr as usize, buf);
        ptr.cast()
    }

    unsafe fn memcpy(&self, dest: *mut c_void, src: *const c_void, count: usize) {
        self.memcpy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let Some(buf) = state.allocations.get_mut(&(dest as usize)) else {
            panic!("mock runtime: memcpy into memory it did not allocate");
        };
        assert!(count <= buf.len(), "mock runtime: memcpy overflows its allocation");
        let src = unsafe { std::slice::from_raw_parts(src.cast::<u8>(), count) };
        buf[..count].copy_from_slice(src);
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        self.free_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().allocations.remove(&(ptr as usize));
    }

    fn is_app_running(&self) -> bool {
        self.app_running_polls.fetch_add(1, Ordering::SeqCst);
        self.app_running.load(Ordering::SeqCst)
    }

    fn exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
        self.app_running.store(false, Ordering::SeqCst);
    }

    fn clean(&self) {}

    fn set_config(&self, option: ConfigOption, status: bool) {
        self.state.lock().config.push((option, status));
    }

    fn set_timeout(&self, _seconds: usize) {}

    fn set_tls_certificate(&self, _certificate_pem: &str, _private_key_pem: &str) -> bool {
        self.native_call_result.load(Ordering::SeqCst)
    }

    fn set_default_root_folder(&self, path: &str) -> bool {
        self.state.lock().root_folders.push((None, path.to_string()));
        self.native_call_result.load(Ordering::SeqCst)
    }
}
