//! Process-level bridge state shared by every window.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::callbacks::CallbackTables;
use crate::config::BridgeConfig;
use crate::dispatcher::{inbound, worker, Action, WorkerRequest};
use crate::error::BridgeError;
use crate::native::{ConfigOption, NativeRuntime, WindowHandle};
use crate::pending::PendingRequests;
use crate::registry::WindowRegistry;
use crate::window::{Window, WindowState};

/// State behind a [`Bridge`].
pub(crate) struct Shared {
    pub(crate) native: Arc<dyn NativeRuntime>,
    pub(crate) config: BridgeConfig,
    /// Base that file-handler paths resolve against.
    pub(crate) base_url: Url,
    pub(crate) windows: WindowRegistry,
    pub(crate) callbacks: CallbackTables,
    pub(crate) pending: PendingRequests,
    worker_tx: mpsc::UnboundedSender<WorkerRequest>,
}

/// Handle to a running bridge. Cheap to clone.
///
/// Starting a bridge spawns the FFI worker thread and the inbound message
/// loop on the current tokio runtime. Handlers run on that runtime.
#[derive(Clone)]
pub struct Bridge {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("windows", &self.shared.windows.len())
            .field("outstanding", &self.shared.pending.outstanding())
            .finish()
    }
}

impl Bridge {
    /// Start the bridge with default configuration.
    pub fn start(native: Arc<dyn NativeRuntime>) -> Result<Self, BridgeError> {
        Self::with_config(native, BridgeConfig::default())
    }

    /// Start the bridge. Must be called from within a tokio runtime.
    pub fn with_config(native: Arc<dyn NativeRuntime>, config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let base_url = config.base_url()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        if config.asynchronous_response {
            native.set_config(ConfigOption::AsynchronousResponse, true);
        }

        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let worker_tx = worker::spawn(native.clone(), host_tx)?;

        let shared = Arc::new(Shared {
            native,
            config,
            base_url,
            windows: WindowRegistry::default(),
            callbacks: CallbackTables::default(),
            pending: PendingRequests::new(),
            worker_tx,
        });
        runtime.spawn(inbound::run(shared.clone(), host_rx));

        tracing::debug!("bridge started");
        Ok(Self { shared })
    }

    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.shared.native
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Send a one-shot action to the FFI worker and wait for its answer.
    ///
    /// Fails with [`BridgeError::DispatcherUnavailable`] once the worker is
    /// gone; a request outstanding when the worker dies is rejected, never
    /// left hanging.
    pub async fn submit(&self, action: Action, payload: Value) -> Result<Value, BridgeError> {
        let (token, reply) = self.shared.pending.open()?;
        let request = WorkerRequest {
            token: token.clone(),
            action,
            payload,
        };
        if self.shared.worker_tx.send(request).is_err() {
            self.shared.pending.discard(&token);
            return Err(BridgeError::DispatcherUnavailable);
        }
        tracing::trace!(%token, action = action.name(), "submitted");

        reply.await.unwrap_or(Err(BridgeError::DispatcherUnavailable))
    }

    /// Create a native window and register it.
    pub fn new_window(&self) -> Window {
        let handle = self.shared.native.new_window();
        let window = Window::new(self.clone(), handle);
        self.shared.windows.insert(window.clone());
        tracing::debug!(window = %handle, "window created");
        window
    }

    /// Look up a live window by handle.
    pub fn window(&self, handle: WindowHandle) -> Option<Window> {
        self.shared.windows.get(handle)
    }

    /// Wait until no window is running any more.
    ///
    /// Polls the runtime on `wait_poll_interval_ms`; returns within one
    /// interval of the last window closing or of [`exit`](Self::exit).
    pub async fn wait(&self) {
        let interval = self.shared.config.wait_poll_interval();
        loop {
            tokio::time::sleep(interval).await;
            if !self.shared.native.is_app_running() {
                break;
            }
        }
        tracing::debug!("no window running, wait finished");
    }

    /// Close every window and release [`wait`](Self::wait).
    pub fn exit(&self) {
        self.shared.native.exit();
        for window in self.shared.windows.windows() {
            if window.state() != WindowState::Destroyed {
                window.mark_closed();
            }
        }
    }

    /// Free all native resources. The runtime is unusable afterwards.
    pub fn clean(&self) {
        self.shared.native.clean();
    }

    /// Seconds the runtime waits for a browser to start.
    pub fn set_timeout(&self, seconds: usize) {
        self.shared.native.set_timeout(seconds);
    }

    pub fn set_tls_certificate(&self, certificate_pem: &str, private_key_pem: &str) -> Result<(), BridgeError> {
        if !self.shared.native.set_tls_certificate(certificate_pem, private_key_pem) {
            return Err(BridgeError::NativeCall {
                operation: "set_tls_certificate",
            });
        }
        Ok(())
    }

    /// Web-server root folder for all windows.
    pub fn set_default_root_folder(&self, path: &str) -> Result<(), BridgeError> {
        if !self.shared.native.set_default_root_folder(path) {
            return Err(BridgeError::NativeCall {
                operation: "set_default_root_folder",
            });
        }
        Ok(())
    }

    /// Refresh the UI when files in the root folder change.
    pub fn set_folder_monitor(&self, status: bool) {
        self.shared.native.set_config(ConfigOption::FolderMonitor, status);
    }

    /// Allow several clients to connect to the same window.
    pub fn set_multi_client(&self, status: bool) {
        self.shared.native.set_config(ConfigOption::MultiClient, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;
    use serde_json::json;
    use std::time::Duration;

    fn bridge() -> (Bridge, Arc<MockRuntime>) {
        let native = Arc::new(MockRuntime::new());
        (Bridge::start(native.clone()).unwrap(), native)
    }

    #[test]
    fn start_outside_runtime_fails() {
        let native = Arc::new(MockRuntime::new());
        assert!(matches!(Bridge::start(native), Err(BridgeError::NoRuntime)));
    }

    #[tokio::test]
    async fn start_enables_asynchronous_responses() {
        let (_bridge, native) = bridge();
        assert_eq!(native.config_calls(), vec![(ConfigOption::AsynchronousResponse, true)]);
    }

    #[tokio::test]
    async fn new_windows_are_registered() {
        let (bridge, _native) = bridge();
        let a = bridge.new_window();
        let b = bridge.new_window();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(bridge.window(a.handle()).unwrap().handle(), a.handle());
        assert_eq!(a.state(), WindowState::Created);
    }

    #[tokio::test]
    async fn submit_round_trips_through_the_worker() {
        let (bridge, native) = bridge();
        let reply = bridge
            .submit(
                Action::Bind,
                json!({"windowId": 1, "elementId": "btn", "callbackIndex": 0}),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!({"bindId": 0}));
        assert_eq!(native.bindings().len(), 1);
        assert_eq!(bridge.shared.pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn submit_reports_malformed_payload_as_protocol_violation() {
        let (bridge, _native) = bridge();
        let err = bridge.submit(Action::Bind, json!({})).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn dead_worker_fails_outstanding_and_future_requests() {
        let (bridge, native) = bridge();
        native.panic_on_bind(true);

        let err = bridge
            .submit(Action::Bind, json!({"windowId": 1, "elementId": "x", "callbackIndex": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::DispatcherUnavailable));

        let err = bridge
            .submit(Action::SetFileHandler, json!({"windowId": 1, "callbackIndex": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::DispatcherUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_within_one_interval_of_the_last_window_closing() {
        let (bridge, native) = bridge();
        let started = tokio::time::Instant::now();

        let closer = {
            let native = native.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_050)).await;
                native.set_app_running(false);
            })
        };

        bridge.wait().await;
        closer.await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_050));
        assert!(elapsed <= Duration::from_millis(1_150));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_releases_wait_and_closes_windows() {
        let (bridge, native) = bridge();
        let window = bridge.new_window();

        bridge.exit();
        bridge.wait().await;

        assert_eq!(native.exits(), 1);
        assert_eq!(native.app_running_polls(), 1);
        assert_eq!(window.state(), WindowState::Closed);
    }

    #[tokio::test]
    async fn failed_native_setup_names_the_operation() {
        let (bridge, native) = bridge();
        native.native_calls_succeed(false);

        let err = bridge.set_tls_certificate("cert", "key").unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall { operation: "set_tls_certificate" }));
        let err = bridge.set_default_root_folder("/srv").unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall { operation: "set_default_root_folder" }));

        native.native_calls_succeed(true);
        bridge.set_tls_certificate("cert", "key").unwrap();
    }

    #[tokio::test]
    async fn global_toggles_use_native_config_numbers() {
        let (bridge, native) = bridge();
        bridge.set_folder_monitor(true);
        bridge.set_multi_client(false);
        assert_eq!(
            native.config_calls(),
            vec![
                (ConfigOption::AsynchronousResponse, true),
                (ConfigOption::FolderMonitor, true),
                (ConfigOption::MultiClient, false),
            ]
        );
    }
}
