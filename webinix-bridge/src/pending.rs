//! Pending request table: correlates requests sent to the FFI worker with
//! the response messages that eventually come back.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{BridgeError, ProtocolViolation};

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Opaque per-request correlation id.
///
/// 26-character Crockford base32: 48 bits of milliseconds followed by 80
/// random bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn generate() -> Self {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut rng = rand::thread_rng();
        let rand_hi: u16 = rng.r#gen();
        let rand_lo: u64 = rng.r#gen();

        let mut buf = [0u8; 26];

        let mut ts = now_ms;
        for i in (0..10).rev() {
            buf[i] = CROCKFORD[(ts & 0x1F) as usize];
            ts >>= 5;
        }

        let mut r = rand_hi as u128 | ((rand_lo as u128) << 16);
        for i in (10..26).rev() {
            buf[i] = CROCKFORD[(r & 0x1F) as usize];
            r >>= 5;
        }

        Token(buf.iter().map(|b| *b as char).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Outcome = Result<serde_json::Value, BridgeError>;

#[derive(Default)]
struct Inner {
    waiting: HashMap<Token, oneshot::Sender<Outcome>>,
    /// Set once the worker is gone; later requests fail fast.
    closed: bool,
}

/// Outstanding requests keyed by token.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request under a fresh token unique among those
    /// outstanding.
    pub fn open(&self) -> Result<(Token, oneshot::Receiver<Outcome>), BridgeError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BridgeError::DispatcherUnavailable);
        }
        let mut token = Token::generate();
        while inner.waiting.contains_key(&token) {
            token = Token::generate();
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting.insert(token.clone(), tx);
        Ok((token, rx))
    }

    /// Settle `token` with `outcome`. Removes the entry, so a second
    /// response for the same token is reported as unknown.
    pub fn resolve(&self, token: &Token, outcome: Outcome) -> Result<(), ProtocolViolation> {
        let sender = self.inner.lock().waiting.remove(token);
        let Some(sender) = sender else {
            return Err(ProtocolViolation::UnknownToken(token.to_string()));
        };
        if sender.send(outcome).is_err() {
            tracing::trace!(%token, "requester stopped waiting before resolution");
        }
        Ok(())
    }

    /// Drop a request that never reached the worker.
    pub fn discard(&self, token: &Token) {
        self.inner.lock().waiting.remove(token);
    }

    /// Reject everything outstanding with `DispatcherUnavailable` and refuse
    /// new requests.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.waiting.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), "rejecting outstanding requests, dispatcher unavailable");
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(BridgeError::DispatcherUnavailable));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_format() {
        let token = Token::generate();
        assert_eq!(token.as_str().len(), 26);
        assert!(token.as_str().bytes().all(|b| CROCKFORD.contains(&b)));
    }

    #[test]
    fn tokens_are_unique() {
        let a = Token::generate();
        let b = Token::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn outstanding_tokens_never_collide() {
        let pending = PendingRequests::new();
        let mut seen = std::collections::HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..1000 {
            let (token, rx) = pending.open().unwrap();
            assert!(seen.insert(token));
            receivers.push(rx);
        }
        assert_eq!(pending.outstanding(), 1000);
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let pending = PendingRequests::new();
        let (token, rx) = pending.open().unwrap();

        pending.resolve(&token, Ok(json!({"bindId": 1}))).unwrap();
        let second = pending.resolve(&token, Ok(json!({"bindId": 2})));
        assert_eq!(second, Err(ProtocolViolation::UnknownToken(token.to_string())));

        assert_eq!(rx.await.unwrap().unwrap(), json!({"bindId": 1}));
        assert_eq!(pending.outstanding(), 0);
    }

    #[test]
    fn unknown_token_is_reported() {
        let pending = PendingRequests::new();
        let stray = Token::generate();
        assert!(matches!(
            pending.resolve(&stray, Ok(serde_json::Value::Null)),
            Err(ProtocolViolation::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn close_rejects_outstanding_and_future_requests() {
        let pending = PendingRequests::new();
        let (_, rx_a) = pending.open().unwrap();
        let (_, rx_b) = pending.open().unwrap();

        pending.close();

        assert!(matches!(rx_a.await.unwrap(), Err(BridgeError::DispatcherUnavailable)));
        assert!(matches!(rx_b.await.unwrap(), Err(BridgeError::DispatcherUnavailable)));
        assert!(matches!(pending.open(), Err(BridgeError::DispatcherUnavailable)));
        assert!(pending.is_closed());
    }

    #[test]
    fn discard_removes_without_resolving() {
        let pending = PendingRequests::new();
        let (token, _rx) = pending.open().unwrap();
        pending.discard(&token);
        assert_eq!(pending.outstanding(), 0);
    }
}
