//! Host-side window object and its lifecycle.
//!
//! ```text
//! Created ──show──▶ Shown ──is_shown polled true──▶ Connected ──close / disconnect──▶ Closed
//!                                                                  destroy (any state) ──▶ Destroyed
//! ```
//!
//! Native resources are only released by an explicit [`Window::destroy`];
//! dropping the last `Window` clone does not call into the runtime.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use crate::callbacks::{BindHandler, FileHandler};
use crate::core::{Bridge, Shared};
use crate::dispatcher::Action;
use crate::error::{BridgeError, ProtocolViolation};
use crate::event::{Event, FileResponse, IntoResponse};
use crate::native::{Browser, ConfigOption, WindowHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Created,
    Shown,
    Connected,
    Closed,
    Destroyed,
}

/// Options for [`Window::script`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptOptions {
    /// Seconds to wait for the UI to answer; 0 waits indefinitely.
    pub timeout_secs: usize,
    /// Size of the answer buffer; `None` uses the configured default.
    pub buffer_size: Option<usize>,
}

struct WindowInner {
    handle: WindowHandle,
    bridge: Bridge,
    state: Mutex<WindowState>,
    /// Set once a custom file handler is installed; such windows have no
    /// connection to wait for.
    file_handler: AtomicBool,
}

/// A webinix window. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("handle", &self.inner.handle)
            .field("state", &self.state())
            .finish()
    }
}

/// Text the runtime wrote into a host buffer, up to the first NUL.
fn buffer_text(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

impl Window {
    pub(crate) fn new(bridge: Bridge, handle: WindowHandle) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                handle,
                bridge,
                state: Mutex::new(WindowState::Created),
                file_handler: AtomicBool::new(false),
            }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.inner.bridge.shared
    }

    pub fn handle(&self) -> WindowHandle {
        self.inner.handle
    }

    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    pub fn state(&self) -> WindowState {
        *self.inner.state.lock()
    }

    fn set_state(&self, state: WindowState) {
        let mut current = self.inner.state.lock();
        if *current != state {
            tracing::debug!(window = %self.inner.handle, from = ?*current, to = ?state, "window state");
            *current = state;
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.set_state(WindowState::Closed);
    }

    /// The runtime reported the window's client gone.
    pub(crate) fn mark_disconnected(&self) {
        if self.state() != WindowState::Destroyed {
            self.mark_closed();
        }
    }

    pub fn has_file_handler(&self) -> bool {
        self.inner.file_handler.load(Ordering::Acquire)
    }

    /// Show the window, or update its content, and wait until the browser
    /// connects.
    ///
    /// Windows with a custom file handler skip the connection wait and do
    /// not check the start status.
    pub async fn show(&self, content: &str) -> Result<(), BridgeError> {
        let started = self.shared().native.show(self.handle(), content);
        if self.has_file_handler() {
            self.set_state(WindowState::Shown);
            return Ok(());
        }
        if !started {
            return Err(BridgeError::NativeCall { operation: "show" });
        }
        self.set_state(WindowState::Shown);
        self.wait_connection().await
    }

    /// Like [`show`](Self::show) with a specific browser. Always checks the
    /// start status and waits for the connection.
    pub async fn show_browser(&self, content: &str, browser: Browser) -> Result<(), BridgeError> {
        if !self.shared().native.show_browser(self.handle(), content, browser) {
            return Err(BridgeError::NativeCall {
                operation: "show_browser",
            });
        }
        self.set_state(WindowState::Shown);
        self.wait_connection().await
    }

    /// Poll `is_shown` up to `connect_attempts` times, `connect_poll_interval_ms`
    /// apart. Leaves the window in `Shown` on timeout so the caller can retry.
    async fn wait_connection(&self) -> Result<(), BridgeError> {
        let config = &self.shared().config;
        let interval = config.connect_poll_interval();
        for _ in 0..config.connect_attempts {
            if self.is_shown() {
                self.set_state(WindowState::Connected);
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        tracing::warn!(window = %self.handle(), attempts = config.connect_attempts, "browser never connected");
        Err(BridgeError::ConnectionTimeout {
            attempts: config.connect_attempts,
        })
    }

    pub fn is_shown(&self) -> bool {
        self.shared().native.is_shown(self.handle())
    }

    pub fn close(&self) {
        self.shared().native.close(self.handle());
        self.mark_closed();
    }

    /// Close the window and release its native resources. The handle is
    /// dropped from the registry; events still in flight for it are
    /// answered empty.
    pub fn destroy(&self) {
        self.shared().native.destroy(self.handle());
        self.shared().windows.remove(self.handle());
        self.set_state(WindowState::Destroyed);
    }

    /// Bind `handler` to the HTML element `element` (empty binds every
    /// event of the window). Returns the native bind id.
    pub async fn bind<F, Fut, R>(&self, element: &str, handler: F) -> Result<usize, BridgeError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        let handler: BindHandler = Arc::new(move |event| {
            let pending = handler(event);
            Box::pin(async move { pending.await.into_response() })
        });
        let callback_index = self.shared().callbacks.bind.register(handler);

        let reply = self
            .bridge()
            .submit(
                Action::Bind,
                json!({
                    "windowId": self.handle(),
                    "elementId": element,
                    "callbackIndex": callback_index,
                }),
            )
            .await?;

        let bind_id = reply
            .get("bindId")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProtocolViolation::MalformedPayload {
                action: Action::Bind.name(),
                reason: format!("reply without bindId: {reply}"),
            })?;
        Ok(bind_id as usize)
    }

    /// Serve every HTTP request of this window from `handler`.
    ///
    /// Once the handler is installed, turns off the runtime's connection
    /// wait and cookies, since the handler now owns content delivery. On
    /// error the window keeps its regular `show` behavior.
    pub async fn set_file_handler<F, Fut, R>(&self, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<FileResponse>,
    {
        let handler: FileHandler = Arc::new(move |url| {
            let pending = handler(url);
            Box::pin(async move { pending.await.into() })
        });
        let callback_index = self.shared().callbacks.file.register(handler);

        self.bridge()
            .submit(
                Action::SetFileHandler,
                json!({
                    "windowId": self.handle(),
                    "callbackIndex": callback_index,
                }),
            )
            .await?;

        let native = &self.shared().native;
        native.set_config(ConfigOption::ShowWaitConnection, false);
        native.set_config(ConfigOption::UseCookies, false);
        self.inner.file_handler.store(true, Ordering::Release);
        Ok(())
    }

    /// Run JavaScript in the UI and return its answer.
    pub async fn script(&self, script: &str, options: ScriptOptions) -> Result<String, BridgeError> {
        self.run_script(None, script, options).await
    }

    /// Run JavaScript in the client that raised `event`.
    pub async fn script_client(&self, event: &Event, script: &str, options: ScriptOptions) -> Result<String, BridgeError> {
        self.run_script(Some(event.event_number), script, options).await
    }

    async fn run_script(
        &self,
        client: Option<usize>,
        script: &str,
        options: ScriptOptions,
    ) -> Result<String, BridgeError> {
        let native = self.shared().native.clone();
        let window = self.handle();
        let size = options
            .buffer_size
            .filter(|n| *n > 0)
            .unwrap_or(self.shared().config.script_buffer_size);
        let script = script.to_string();

        let (ok, answer) = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; size];
            let ok = match client {
                Some(event_number) => {
                    native.script_client(window, event_number, &script, options.timeout_secs, &mut buffer)
                }
                None => native.script(window, &script, options.timeout_secs, &mut buffer),
            };
            (ok, buffer_text(&buffer))
        })
        .await
        .map_err(|e| BridgeError::Script(format!("script task failed: {e}")))?;

        if ok {
            Ok(answer)
        } else {
            Err(BridgeError::Script(answer))
        }
    }

    /// Run JavaScript in the UI without waiting for an answer.
    pub fn run(&self, script: &str) {
        self.shared().native.run(self.handle(), script);
    }

    pub fn set_root_folder(&self, path: &str) -> Result<(), BridgeError> {
        if !self.shared().native.set_root_folder(self.handle(), path) {
            return Err(BridgeError::NativeCall {
                operation: "set_root_folder",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::testing::MockRuntime;
    use std::time::Duration;
    use tokio::time::Instant;

    fn bridge() -> (Bridge, Arc<MockRuntime>) {
        let native = Arc::new(MockRuntime::new());
        (Bridge::start(native.clone()).unwrap(), native)
    }

    #[tokio::test(start_paused = true)]
    async fn show_waits_exactly_n_polls() {
        let (bridge, native) = bridge();
        native.shown_after(5);
        let window = bridge.new_window();

        let started = Instant::now();
        window.show("<html></html>").await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(5 * 250));
        // Five polls answered false, the sixth true.
        assert_eq!(native.shown_polls(window.handle()), 6);
        assert_eq!(window.state(), WindowState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn show_times_out_after_120_attempts() {
        let (bridge, native) = bridge();
        native.never_shown();
        let window = bridge.new_window();

        let started = Instant::now();
        let err = window.show("<html></html>").await.unwrap_err();

        assert!(matches!(err, BridgeError::ConnectionTimeout { attempts: 120 }));
        assert_eq!(native.shown_polls(window.handle()), 120);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        // Still usable for a retry.
        assert_eq!(window.state(), WindowState::Shown);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_timeout_can_connect() {
        let native = Arc::new(MockRuntime::new());
        let config = BridgeConfig {
            connect_attempts: 3,
            ..BridgeConfig::default()
        };
        let bridge = Bridge::with_config(native.clone(), config).unwrap();
        native.shown_after(4);
        let window = bridge.new_window();

        assert!(window.show("a").await.is_err());
        window.show("a").await.unwrap();
        assert_eq!(window.state(), WindowState::Connected);
    }

    #[tokio::test]
    async fn failed_start_does_not_poll() {
        let (bridge, native) = bridge();
        native.show_succeeds(false);
        let window = bridge.new_window();

        let err = window.show("x").await.unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall { operation: "show" }));
        assert_eq!(native.shown_polls(window.handle()), 0);
        assert_eq!(window.state(), WindowState::Created);

        let err = window.show_browser("x", Browser::Firefox).await.unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall { operation: "show_browser" }));
    }

    #[tokio::test]
    async fn file_handler_windows_skip_the_connection_wait() {
        let (bridge, native) = bridge();
        native.never_shown();
        native.show_succeeds(false);
        let window = bridge.new_window();

        window.set_file_handler(|_url| async { "body" }).await.unwrap();
        window.show("index.html").await.unwrap();

        assert_eq!(native.shown_polls(window.handle()), 0);
        assert_eq!(window.state(), WindowState::Shown);
        assert!(native.has_file_handler(window.handle()));
        let config = native.config_calls();
        assert!(config.contains(&(ConfigOption::ShowWaitConnection, false)));
        assert!(config.contains(&(ConfigOption::UseCookies, false)));
    }

    #[tokio::test]
    async fn failed_file_handler_install_keeps_the_connection_wait() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();
        native.panic_on_bind(true);
        assert!(window.bind("x", |_event| async {}).await.is_err());

        let err = window.set_file_handler(|_url| async { "body" }).await.unwrap_err();
        assert!(matches!(err, BridgeError::DispatcherUnavailable));
        assert!(!window.has_file_handler());
        assert!(!native
            .config_calls()
            .contains(&(ConfigOption::ShowWaitConnection, false)));

        window.show("index.html").await.unwrap();
        assert_eq!(native.shown_polls(window.handle()), 1);
        assert_eq!(window.state(), WindowState::Connected);
    }

    #[tokio::test]
    async fn close_and_destroy() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();

        window.close();
        assert_eq!(window.state(), WindowState::Closed);
        assert_eq!(native.closed(), vec![window.handle()]);
        assert!(bridge.window(window.handle()).is_some());

        window.destroy();
        assert_eq!(window.state(), WindowState::Destroyed);
        assert_eq!(native.destroyed(), vec![window.handle()]);
        assert!(bridge.window(window.handle()).is_none());
    }

    #[tokio::test]
    async fn script_answers_and_failures() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();

        native.answer_scripts(true, "42");
        let answer = window.script("return 6 * 7;", ScriptOptions::default()).await.unwrap();
        assert_eq!(answer, "42");

        native.answer_scripts(false, "ReferenceError: x is not defined");
        let err = window.script("return x;", ScriptOptions::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Script(ref text) if text.starts_with("ReferenceError")));
    }

    #[tokio::test]
    async fn script_answer_is_bounded_by_the_buffer() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();
        native.answer_scripts(true, "abcdefgh");

        let options = ScriptOptions {
            timeout_secs: 1,
            buffer_size: Some(4),
        };
        assert_eq!(window.script("x", options).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn run_and_root_folder() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();

        window.run("alert(1)");
        assert_eq!(native.scripts(), vec![(window.handle(), None, "alert(1)".to_string())]);

        window.set_root_folder("/srv/ui").unwrap();
        native.native_calls_succeed(false);
        let err = window.set_root_folder("/missing").unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall { operation: "set_root_folder" }));
        assert_eq!(native.root_folders().len(), 2);
    }

    #[test]
    fn buffer_text_reads_up_to_nul() {
        assert_eq!(buffer_text(b"ok\0rest"), "ok");
        assert_eq!(buffer_text(b"no-nul"), "no-nul");
        assert_eq!(buffer_text(b"\0"), "");
    }
}
