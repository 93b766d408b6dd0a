//! Callback indirection tables.
//!
//! The native runtime never sees a host closure. A handler is appended to a
//! table and only its index crosses to the FFI worker; the trampoline the
//! worker registers posts that index back when the runtime fires. Tables are
//! append-only: the runtime keeps bound indices forever, so an index stays
//! valid for the life of the process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use crate::error::{CallbackKind, ProtocolViolation};
use crate::event::{Event, FileResponse};

pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Element-bind handler, already reduced to its stringified answer.
pub type BindHandler = Arc<dyn Fn(Event) -> HandlerFuture<String> + Send + Sync>;

/// File handler: requested URL in, body out.
pub type FileHandler = Arc<dyn Fn(Url) -> HandlerFuture<FileResponse> + Send + Sync>;

/// One append-only table.
pub struct CallbackTable<H> {
    kind: CallbackKind,
    entries: RwLock<Vec<H>>,
}

impl<H: Clone> CallbackTable<H> {
    pub fn new(kind: CallbackKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append `handler` and return its index.
    pub fn register(&self, handler: H) -> usize {
        let mut entries = self.entries.write();
        entries.push(handler);
        let index = entries.len() - 1;
        tracing::debug!(kind = %self.kind, index, "callback registered");
        index
    }

    pub fn get(&self, index: usize) -> Result<H, ProtocolViolation> {
        self.entries
            .read()
            .get(index)
            .cloned()
            .ok_or(ProtocolViolation::MissingCallback {
                kind: self.kind,
                index,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CallbackTable<BindHandler> {
    /// Look up the handler at `index` and start it with `event`.
    ///
    /// The table lock is released before the handler runs, so a handler may
    /// register further callbacks.
    pub fn invoke(&self, index: usize, event: Event) -> Result<HandlerFuture<String>, ProtocolViolation> {
        let handler = self.get(index)?;
        Ok(handler(event))
    }
}

impl CallbackTable<FileHandler> {
    pub fn invoke(&self, index: usize, url: Url) -> Result<HandlerFuture<FileResponse>, ProtocolViolation> {
        let handler = self.get(index)?;
        Ok(handler(url))
    }
}

/// The two independent tables.
pub struct CallbackTables {
    pub bind: CallbackTable<BindHandler>,
    pub file: CallbackTable<FileHandler>,
}

impl Default for CallbackTables {
    fn default() -> Self {
        Self {
            bind: CallbackTable::new(CallbackKind::ElementBind),
            file: CallbackTable::new(CallbackKind::FileHandler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_handler(body: &'static str) -> FileHandler {
        Arc::new(move |_url| Box::pin(async move { FileResponse::from(body) }))
    }

    #[test]
    fn indices_are_stable_and_sequential() {
        let tables = CallbackTables::default();
        assert!(tables.file.is_empty());
        assert_eq!(tables.file.register(file_handler("a")), 0);
        assert_eq!(tables.file.register(file_handler("b")), 1);
        assert_eq!(tables.file.register(file_handler("c")), 2);
        assert_eq!(tables.file.len(), 3);
        // The element-bind table is independent.
        assert!(tables.bind.is_empty());
    }

    #[test]
    fn missing_index_is_a_protocol_violation() {
        let tables = CallbackTables::default();
        tables.file.register(file_handler("a"));
        let err = tables.file.get(5).err().unwrap();
        assert_eq!(
            err,
            ProtocolViolation::MissingCallback {
                kind: CallbackKind::FileHandler,
                index: 5
            }
        );
        assert!(matches!(
            tables.bind.get(0),
            Err(ProtocolViolation::MissingCallback {
                kind: CallbackKind::ElementBind,
                index: 0
            })
        ));
    }

    #[tokio::test]
    async fn invoke_calls_exactly_the_indexed_handler() {
        let tables = CallbackTables::default();
        tables.file.register(file_handler("first"));
        tables.file.register(file_handler("second"));

        let url = Url::parse("http://localhost/index.html").unwrap();
        let body = tables.file.invoke(1, url).unwrap().await;
        assert_eq!(body.as_bytes(), b"second");
    }
}
