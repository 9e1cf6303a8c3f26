//! Endpoint registry: named handlers a channel dispatches incoming calls to.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use spyglass_protocol::WireValue;

use crate::error::ObjectError;

/// A handler fault, carried back to the caller as an `Error` message.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub detail: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Fault {
            message: message.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Fault {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

impl From<ObjectError> for Fault {
    fn from(err: ObjectError) -> Self {
        Fault {
            message: err.to_string(),
            detail: format!("{err:?}"),
        }
    }
}

/// Boxed future produced by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<WireValue, Fault>> + Send>>;

/// A named endpoint implementation.
pub type Handler =
    Arc<dyn Fn(Vec<WireValue>, HashMap<String, WireValue>) -> HandlerFuture + Send + Sync>;

/// Wraps an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<WireValue>, HashMap<String, WireValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WireValue, Fault>> + Send + 'static,
{
    Arc::new(move |args, kwargs| Box::pin(f(args, kwargs)))
}

/// The set of endpoints a channel serves.
#[derive(Default)]
pub struct Endpoints {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl Endpoints {
    pub fn new() -> Self {
        Endpoints::default()
    }

    /// Registers a handler, replacing any previous binding of the name.
    pub fn bind(&self, name: impl Into<String>, handler: Handler) {
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
