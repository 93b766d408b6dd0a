//! Bridge configuration.
//!
//! Parsed from a JSON string; every field is optional:
//! ```json
//! {
//!   "connect_poll_interval_ms": 250,
//!   "connect_attempts": 120,
//!   "wait_poll_interval_ms": 100,
//!   "script_buffer_size": 1024000,
//!   "file_handler_base": "http://localhost",
//!   "asynchronous_response": true
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::BridgeError;

/// Default base authority that relative file-handler paths resolve against.
pub const DEFAULT_FILE_HANDLER_BASE: &str = "http://localhost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interval between `is_shown` polls while waiting for a connection.
    pub connect_poll_interval_ms: u64,
    /// Number of `is_shown` polls before `show` gives up (120 × 250ms ≈ 30s).
    pub connect_attempts: u32,
    /// Interval of the global `wait` loop.
    pub wait_poll_interval_ms: u64,
    /// Default size of the buffer a script answer is written into.
    pub script_buffer_size: usize,
    pub file_handler_base: String,
    /// Applied to the runtime when the bridge starts.
    pub asynchronous_response: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_poll_interval_ms: 250,
            connect_attempts: 120,
            wait_poll_interval_ms: 100,
            script_buffer_size: 1024 * 1000,
            file_handler_base: DEFAULT_FILE_HANDLER_BASE.to_string(),
            asynchronous_response: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.script_buffer_size == 0 {
            return Err(BridgeError::Config("script_buffer_size must be positive".into()));
        }
        // Zero attempts would fail every `show` without polling.
        if self.connect_attempts == 0 {
            return Err(BridgeError::Config("connect_attempts must be positive".into()));
        }
        // Zero would turn `wait` into a busy loop.
        if self.wait_poll_interval_ms == 0 {
            return Err(BridgeError::Config("wait_poll_interval_ms must be positive".into()));
        }
        self.base_url()?;
        Ok(())
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn base_url(&self) -> Result<Url, BridgeError> {
        Url::parse(&self.file_handler_base)
            .map_err(|e| BridgeError::Config(format!("file_handler_base: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.connect_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.connect_attempts, 120);
        assert_eq!(config.wait_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.script_buffer_size, 1_024_000);
        assert!(config.asynchronous_response);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(r#"{"connect_attempts": 4}"#).unwrap();
        assert_eq!(config.connect_attempts, 4);
        assert_eq!(config.connect_poll_interval_ms, 250);
        assert_eq!(config.file_handler_base, "http://localhost");
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(BridgeConfig::from_json("{}").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn invalid_json() {
        assert!(matches!(BridgeConfig::from_json("not json"), Err(BridgeError::Config(_))));
    }

    #[test]
    fn invalid_values() {
        assert!(BridgeConfig::from_json(r#"{"script_buffer_size": 0}"#).is_err());
        assert!(BridgeConfig::from_json(r#"{"file_handler_base": "no scheme"}"#).is_err());
    }

    #[test]
    fn polling_loops_need_positive_settings() {
        let err = BridgeConfig::from_json(r#"{"connect_attempts": 0}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ref m) if m.contains("connect_attempts")));
        let err = BridgeConfig::from_json(r#"{"wait_poll_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ref m) if m.contains("wait_poll_interval_ms")));

        let config = BridgeConfig {
            connect_attempts: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
