//! Callback and event bridge between host async code and the webinix native
//! runtime.
//!
//! The native runtime calls back from its own threads. Those calls never run
//! host handlers directly: a dedicated FFI worker thread owns callback
//! registration and hands the runtime trampolines that only post a callback
//! index onto a queue. A host-side loop on the tokio runtime resolves the
//! index to a handler, runs it, and writes the response back.
//!
//! ```no_run
//! # async fn demo(native: std::sync::Arc<dyn webinix_bridge::NativeRuntime>) -> Result<(), webinix_bridge::BridgeError> {
//! use webinix_bridge::Bridge;
//!
//! let bridge = Bridge::start(native)?;
//! let window = bridge.new_window();
//! window
//!     .bind("go", |event| async move { format!("clicked #{}", event.event_number) })
//!     .await?;
//! window.show("<html><button id=\"go\">Go</button></html>").await?;
//! bridge.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod callbacks;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod native;
pub mod pending;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod window;

pub use crate::config::BridgeConfig;
pub use crate::core::Bridge;
pub use crate::error::{BridgeError, CallbackKind, ProtocolViolation};
pub use crate::event::{Event, EventArgs, EventType, FileResponse, IntoResponse};
#[cfg(feature = "linked")]
pub use crate::native::linked::LinkedRuntime;
pub use crate::native::{Browser, ConfigOption, NativeRuntime, WindowHandle};
pub use crate::window::{ScriptOptions, Window, WindowState};
