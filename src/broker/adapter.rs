//! Transport Adapter Contract
//!
//! Design Decision: Capability-set trait plus a dispatch table keyed by transport kind
//!
//! Each transport (subprocess, HTTP, WebSocket) implements `TransportAdapter`
//! independently; there is no shared base type. The broker picks an
//! implementation by looking up the provider's `TransportKind` in an
//! `AdapterTable` and calling the registered factory, so tests and embedders
//! can swap in their own adapters per kind.
//!
//! Error contract:
//! - `connect` fails with `BrokerError::Connection` (validation, spawn,
//!   handshake) and leaves the adapter disconnected
//! - `invoke` encodes business failures and mid-call transport failures in
//!   the returned `InvocationResult`; it only returns `Err` for
//!   `NotConnected` and `CapabilityNotFound`

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::config::{ProviderConfig, TransportKind};
use crate::broker::http::HttpAdapter;
use crate::broker::schema::{Arguments, Capability, InvocationResult};
use crate::broker::stdio::StdioAdapter;
use crate::broker::websocket::WebSocketAdapter;
use crate::error::Result;

/// Uniform contract every transport implements
///
/// Thread Safety: adapters are shared behind `Arc` and must accept
/// concurrent `invoke` calls; a transport that can only carry one exchange
/// at a time serializes internally.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Transport kind this adapter implements
    fn kind(&self) -> TransportKind;

    /// Validate the config and perform the transport handshake
    async fn connect(&self, config: &ProviderConfig) -> Result<()>;

    /// Release transport resources (best-effort, never fails)
    async fn disconnect(&self);

    /// Current capability list, each stamped with the provider name
    async fn discover_capabilities(&self) -> Result<Vec<Capability>>;

    /// Invoke one capability; elapsed time is measured from dispatch to completion
    async fn invoke(&self, capability: &str, arguments: &Arguments) -> Result<InvocationResult>;

    fn is_connected(&self) -> bool;
}

/// Constructor for a fresh, unconnected adapter instance
pub type AdapterFactory = Arc<dyn Fn() -> Arc<dyn TransportAdapter> + Send + Sync>;

/// Dispatch table: transport kind → adapter factory
#[derive(Clone)]
pub struct AdapterTable {
    factories: HashMap<TransportKind, AdapterFactory>,
}

impl AdapterTable {
    /// Empty table (every kind unsupported)
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Table with the built-in stdio, HTTP and WebSocket adapters
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.register(TransportKind::Stdio, Arc::new(|| Arc::new(StdioAdapter::new()) as Arc<dyn TransportAdapter>));
        table.register(TransportKind::Http, Arc::new(|| Arc::new(HttpAdapter::new()) as Arc<dyn TransportAdapter>));
        table.register(
            TransportKind::WebSocket,
            Arc::new(|| Arc::new(WebSocketAdapter::new()) as Arc<dyn TransportAdapter>),
        );
        table
    }

    /// Register (or replace) the factory for a transport kind
    pub fn register(&mut self, kind: TransportKind, factory: AdapterFactory) {
        self.factories.insert(kind, factory);
    }

    /// New adapter for `kind`, or `None` if the kind is unsupported
    pub fn create(&self, kind: &TransportKind) -> Option<Arc<dyn TransportAdapter>> {
        self.factories.get(kind).map(|factory| factory())
    }

    pub fn supports(&self, kind: &TransportKind) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }
}

impl Default for AdapterTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
