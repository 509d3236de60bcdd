//! Handler registry (C3) — name-keyed dispatch table for commands arriving
//! over the wire protocol.
//!
//! Handlers register under a name and can be replaced at any time; a
//! replacement takes effect for the next lookup with no restart and no
//! window where the name resolves to nothing (the map swap is a single
//! write-locked insert).

#![forbid(unsafe_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How the scheduler should run a handler.
///
/// Cooperative handlers are `await`ed directly on the dispatch loop and must
/// not block; blocking handlers are spilled onto the bounded worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Cooperative,
    Blocking,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler error: {0}")]
    Failed(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

/// A command handler. `invoke` receives the command's `params` value and
/// returns the `data` value for a successful [`relay_proto::Response`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError>;

    /// Scheduling kind. Defaults to cooperative.
    fn kind(&self) -> HandlerKind {
        HandlerKind::Cooperative
    }

    /// Override for this handler's timeout; `None` defers to the
    /// scheduler's configured default.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Name-keyed table of registered handlers.
///
/// Cheap to clone (wraps an `Arc`); clones share the same underlying table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any existing handler
    /// with the same name. The replacement is visible to the very next
    /// [`Registry::lookup`] call.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        let mut table = self.inner.write();
        let replaced = table.insert(name.clone(), handler).is_some();
        debug!(name, replaced, "handler registered");
    }

    /// Remove a handler. Returns `true` if one was present.
    pub fn deregister(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.inner.read().get(name).cloned()
    }

    /// Names of all currently-registered handlers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
