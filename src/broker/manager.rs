//! Broker: the orchestrating core
//!
//! Design Decision: Explicitly constructed, cloneable coordinator
//!
//! Rationale: The broker composes the provider registry, the capability
//! catalog, the execution tracker and the adapter dispatch table behind
//! `Arc<RwLock<>>` so it can be cloned into any task that needs to invoke
//! tools. There is no global instance; callers build one and pass it down.
//!
//! Invocation flow:
//! 1. Record created (pending)
//! 2. Provider, capability and adapter resolved; any failure here fails the
//!    record and returns immediately, no timer involved
//! 3. Record marked running, transport call spawned
//! 4. Transport call raced against the effective timeout
//!
//! Cancellation: a timed-out transport call is abandoned, not aborted. The
//! spawned task keeps running and its completion is rejected by the tracker
//! because the record is already `timed_out`.
//!
//! Lock discipline: no registry, catalog or adapter lock is held across a
//! transport await.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::broker::adapter::{AdapterFactory, AdapterTable, TransportAdapter};
use crate::broker::config::{BrokerConfig, ProviderConfig, TransportKind};
use crate::broker::policy::TimeoutPolicy;
use crate::broker::registry::{ProviderEntry, ProviderRegistry};
use crate::broker::schema::{
    Arguments, Capability, ExecutionId, ExecutionRecord, ExecutionStatus, InvocationRequest, InvocationResult,
};
use crate::broker::tracker::ExecutionTracker;
use crate::error::{BrokerError, Result};
use crate::events::{BrokerEvent, Event, EventBus};

/// Capabilities of one provider plus when they were last discovered
#[derive(Debug, Clone)]
struct CatalogEntry {
    capabilities: Vec<Capability>,
    /// Broker-wide discovery counter; higher is more recent
    discovered_seq: u64,
}

/// Outcome of a successful `register_provider`
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredProvider {
    pub name: String,
    pub transport: TransportKind,
    pub capabilities: Vec<Capability>,
    /// Discovery failed after a successful connect; the provider stays connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
}

/// Per-provider outcome of a bulk registration
pub type RegistrationOutcome = (String, Result<RegisteredProvider>);

#[derive(Clone)]
pub struct Broker {
    registry: Arc<RwLock<ProviderRegistry>>,
    catalog: Arc<RwLock<HashMap<String, CatalogEntry>>>,
    adapters: Arc<RwLock<HashMap<String, Arc<dyn TransportAdapter>>>>,
    tracker: ExecutionTracker,
    policy: Arc<TimeoutPolicy>,
    table: Arc<AdapterTable>,
    events: EventBus,
    discovery_seq: Arc<AtomicU64>,
}

impl Broker {
    /// Broker with the built-in adapters and default timeout policy
    pub fn new() -> Self {
        Self::from_parts(AdapterTable::with_defaults(), TimeoutPolicy::default(), EventBus::new())
    }

    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    fn from_parts(table: AdapterTable, policy: TimeoutPolicy, events: EventBus) -> Self {
        Self {
            registry: Arc::new(RwLock::new(ProviderRegistry::new())),
            catalog: Arc::new(RwLock::new(HashMap::new())),
            adapters: Arc::new(RwLock::new(HashMap::new())),
            tracker: ExecutionTracker::new(),
            policy: Arc::new(policy),
            table: Arc::new(table),
            events,
            discovery_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a broker from a config file's contents and register every provider
    ///
    /// One provider failing does not stop the others; each outcome is returned.
    pub async fn from_config(config: BrokerConfig) -> Result<(Self, Vec<RegistrationOutcome>)> {
        let providers = config.providers.clone();
        let broker = BrokerBuilder::new().config(config).build()?;
        let outcomes = broker.register_all(providers).await;
        Ok((broker, outcomes))
    }

    // ---- Provider lifecycle ----

    /// Register, connect and discover a provider
    ///
    /// Error Conditions:
    /// - Invalid config: `Config`, nothing is registered
    /// - No adapter for the transport kind: `UnsupportedTransport`, no connect attempted
    /// - Handshake failure: `Connection`, provider left in `error` state
    ///
    /// Discovery failure after a successful connect is reported in
    /// `RegisteredProvider::discovery_error` and does not undo the connection.
    pub async fn register_provider(&self, config: ProviderConfig) -> Result<RegisteredProvider> {
        config.validate()?;
        let name = config.name.clone();

        // Re-registration replaces the previous connection
        let previous = self.adapters.write().await.remove(&name);
        if let Some(previous) = previous {
            tracing::info!("Re-registering provider '{}', closing previous connection", name);
            previous.disconnect().await;
            self.catalog.write().await.remove(&name);
        }

        self.registry.write().await.register(&config);

        let Some(adapter) = self.table.create(&config.transport) else {
            let err = BrokerError::UnsupportedTransport {
                provider: name.clone(),
                transport: config.transport.to_string(),
            };
            self.record_provider_error(&name, &err).await;
            return Err(err);
        };

        if let Err(e) = adapter.connect(&config).await {
            let err = match e {
                BrokerError::Connection { .. } => e,
                other => BrokerError::connection(&name, other.to_string()),
            };
            self.record_provider_error(&name, &err).await;
            return Err(err);
        }

        self.registry.write().await.mark_connected(&name);
        self.adapters.write().await.insert(name.clone(), adapter);
        self.events.emit(BrokerEvent::ProviderConnected { provider: name.clone() });
        tracing::info!("Provider '{}' connected via {}", name, config.transport);

        let (capabilities, discovery_error) = match self.discover_capabilities(&name).await {
            Ok(capabilities) => (capabilities, None),
            Err(e) => {
                tracing::warn!("Discovery failed for provider '{}': {}", name, e);
                self.events.emit(BrokerEvent::ProviderError {
                    provider: name.clone(),
                    message: e.to_string(),
                });
                (Vec::new(), Some(e.to_string()))
            }
        };

        Ok(RegisteredProvider {
            name,
            transport: config.transport,
            capabilities,
            discovery_error,
        })
    }

    async fn record_provider_error(&self, name: &str, err: &BrokerError) {
        tracing::error!("Provider '{}' failed to register: {}", name, err);
        self.registry.write().await.mark_error(name, err.to_string());
        self.events.emit(BrokerEvent::ProviderError {
            provider: name.to_string(),
            message: err.to_string(),
        });
    }

    /// Register several providers concurrently
    pub async fn register_all(&self, configs: Vec<ProviderConfig>) -> Vec<RegistrationOutcome> {
        let registrations = configs.into_iter().map(|config| async move {
            let name = config.name.clone();
            (name, self.register_provider(config).await)
        });
        join_all(registrations).await
    }

    /// Re-run discovery for a provider, replacing its catalog entry
    pub async fn discover_capabilities(&self, name: &str) -> Result<Vec<Capability>> {
        let adapter = self.connected_adapter(name).await?;

        let mut capabilities = adapter.discover_capabilities().await?;
        for capability in &mut capabilities {
            capability.provider = name.to_string();
        }

        let seq = self.discovery_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.catalog.write().await.insert(
            name.to_string(),
            CatalogEntry {
                capabilities: capabilities.clone(),
                discovered_seq: seq,
            },
        );

        tracing::debug!("Discovered {} capabilities on '{}'", capabilities.len(), name);
        self.events.emit(BrokerEvent::CapabilitiesDiscovered {
            provider: name.to_string(),
            count: capabilities.len(),
        });
        Ok(capabilities)
    }

    /// Adapter for a provider that is registered and connected
    async fn connected_adapter(&self, name: &str) -> Result<Arc<dyn TransportAdapter>> {
        match self.registry.read().await.get(name) {
            None => return Err(BrokerError::ProviderNotFound(name.to_string())),
            Some(entry) if !entry.is_connected() => {
                return Err(BrokerError::ProviderNotConnected(name.to_string()))
            }
            Some(_) => {}
        }
        let adapter = self
            .adapters
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::ProviderNotConnected(name.to_string()))?;

        if !adapter.is_connected() {
            self.connection_lost(name, &adapter).await;
            return Err(BrokerError::ProviderNotConnected(name.to_string()));
        }
        Ok(adapter)
    }

    /// Move a provider to `error` after its transport dropped on its own
    ///
    /// No-op when `adapter` is no longer the provider's current adapter
    /// (torn down or replaced in the meantime).
    async fn connection_lost(&self, name: &str, adapter: &Arc<dyn TransportAdapter>) {
        {
            let mut adapters = self.adapters.write().await;
            match adapters.get(name) {
                Some(current) if Arc::ptr_eq(current, adapter) => {
                    adapters.remove(name);
                }
                _ => return,
            }
        }
        adapter.disconnect().await;

        let message = "transport closed by provider".to_string();
        tracing::warn!("Provider '{}' lost its connection", name);
        self.registry.write().await.mark_error(name, message.clone());
        self.catalog.write().await.remove(name);
        self.events.emit(BrokerEvent::ProviderError {
            provider: name.to_string(),
            message,
        });
    }

    /// Tear down a provider's adapter and empty its catalog
    ///
    /// The registry entry stays, marked `disconnected`.
    pub async fn disconnect_provider(&self, name: &str) -> Result<()> {
        if self.registry.read().await.get(name).is_none() {
            return Err(BrokerError::ProviderNotFound(name.to_string()));
        }

        let adapter = self.adapters.write().await.remove(name);
        if let Some(adapter) = adapter {
            adapter.disconnect().await;
        }

        self.registry.write().await.mark_disconnected(name);
        self.catalog.write().await.remove(name);
        self.events.emit(BrokerEvent::ProviderDisconnected {
            provider: name.to_string(),
        });
        tracing::info!("Provider '{}' disconnected", name);
        Ok(())
    }

    /// Disconnect every provider in parallel
    pub async fn disconnect_all(&self) {
        let names = self.registry.read().await.names();
        let results = join_all(names.iter().map(|name| self.disconnect_provider(name))).await;

        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Error disconnecting provider '{}': {}", name, e);
            }
        }
    }

    /// Disconnect and forget a provider
    pub async fn remove_provider(&self, name: &str) -> Result<ProviderEntry> {
        self.disconnect_provider(name).await?;
        self.registry
            .write()
            .await
            .remove(name)
            .ok_or_else(|| BrokerError::ProviderNotFound(name.to_string()))
    }

    // ---- Invocation ----

    /// Invoke a capability on a specific provider
    ///
    /// Returns `Ok` with `success: false` for business failures. Raises for
    /// unknown/disconnected providers, unknown capabilities and timeouts.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult> {
        let id = self
            .tracker
            .begin(&request.provider, &request.capability, request.arguments.clone())
            .await;

        let adapter = match self.resolve(&request).await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.tracker.fail(id, e.to_string()).await;
                self.finished(id, &request, ExecutionStatus::Failed);
                return Err(e);
            }
        };

        let timeout = self.policy.effective_timeout(&request);
        self.tracker.mark_running(id).await;
        self.events.emit(BrokerEvent::ExecutionStarted {
            id,
            provider: request.provider.clone(),
            capability: request.capability.clone(),
        });
        tracing::debug!(
            "Dispatching '{}' on '{}' (execution {}, timeout {}ms)",
            request.capability,
            request.provider,
            id,
            timeout.as_millis()
        );

        let mut task = tokio::spawn(Self::run_transport_call(self.clone(), adapter, id, request.clone()));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep(timeout) => {
                if self.tracker.timeout(id, timeout).await {
                    tracing::warn!(
                        "'{}' on '{}' timed out after {}ms (execution {})",
                        request.capability,
                        request.provider,
                        timeout.as_millis(),
                        id
                    );
                    self.finished(id, &request, ExecutionStatus::TimedOut);
                    // Dropping the handle detaches the task; it is not aborted
                    return Err(BrokerError::Timeout {
                        provider: request.provider,
                        capability: request.capability,
                        timeout,
                    });
                }
                // The transport call settled the record first
                task.await
            }
        };

        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("Invocation task failed: {}", e);
                if self.tracker.fail(id, &message).await {
                    self.finished(id, &request, ExecutionStatus::Failed);
                }
                Err(BrokerError::Transport(message))
            }
        }
    }

    /// Resolve everything the call needs before dispatch
    async fn resolve(&self, request: &InvocationRequest) -> Result<Arc<dyn TransportAdapter>> {
        let adapter = self.connected_adapter(&request.provider).await?;

        let known = self
            .catalog
            .read()
            .await
            .get(&request.provider)
            .map(|entry| entry.capabilities.iter().any(|c| c.name == request.capability))
            .unwrap_or(false);
        if !known {
            return Err(BrokerError::capability_not_found(&request.provider, &request.capability));
        }
        Ok(adapter)
    }

    /// Body of the spawned transport call
    ///
    /// Updates the record itself so a completion after the caller gave up
    /// still reaches the tracker, which rejects it if the record timed out.
    async fn run_transport_call(
        broker: Broker,
        adapter: Arc<dyn TransportAdapter>,
        id: ExecutionId,
        request: InvocationRequest,
    ) -> Result<InvocationResult> {
        let outcome = adapter.invoke(&request.capability, &request.arguments).await;
        if !adapter.is_connected() {
            broker.connection_lost(&request.provider, &adapter).await;
        }

        let Broker { tracker, events, .. } = broker;

        let (accepted, status) = match &outcome {
            Ok(result) if result.success => (tracker.complete(id, result.clone()).await, ExecutionStatus::Completed),
            Ok(result) => (tracker.complete(id, result.clone()).await, ExecutionStatus::Failed),
            Err(e) => (tracker.fail(id, e.to_string()).await, ExecutionStatus::Failed),
        };

        if accepted {
            events.emit(BrokerEvent::ExecutionFinished {
                id,
                provider: request.provider,
                capability: request.capability,
                status,
            });
        } else {
            tracing::debug!(
                "Ignoring late completion of '{}' on '{}' (execution {})",
                request.capability,
                request.provider,
                id
            );
        }
        outcome
    }

    fn finished(&self, id: ExecutionId, request: &InvocationRequest, status: ExecutionStatus) {
        self.events.emit(BrokerEvent::ExecutionFinished {
            id,
            provider: request.provider.clone(),
            capability: request.capability.clone(),
            status,
        });
    }

    /// Name-only shortcut: invoke on whichever provider discovered `capability` most recently
    pub async fn invoke_by_name(&self, capability: &str, arguments: Arguments) -> Result<InvocationResult> {
        let found = self
            .find_capability(capability)
            .await
            .ok_or_else(|| BrokerError::capability_not_found("*", capability))?;
        self.invoke(InvocationRequest::new(found.provider, capability).with_arguments(arguments))
            .await
    }

    // ---- Catalog queries ----

    pub async fn providers(&self) -> Vec<ProviderEntry> {
        self.registry.read().await.all()
    }

    pub async fn provider(&self, name: &str) -> Option<ProviderEntry> {
        self.registry.read().await.get(name).cloned()
    }

    /// Current capabilities of one provider (empty if unknown or disconnected)
    pub async fn capabilities(&self, provider: &str) -> Vec<Capability> {
        self.catalog
            .read()
            .await
            .get(provider)
            .map(|entry| entry.capabilities.clone())
            .unwrap_or_default()
    }

    /// Union of every provider's capabilities, sorted by provider then name
    pub async fn get_all_tools(&self) -> Vec<Capability> {
        let mut tools: Vec<Capability> = self
            .catalog
            .read()
            .await
            .values()
            .flat_map(|entry| entry.capabilities.iter().cloned())
            .collect();
        tools.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        tools
    }

    /// Every capability, least recently discovered provider first
    ///
    /// Inserting these into a name-keyed map in order yields
    /// most-recently-discovered-wins for colliding names.
    pub async fn catalog_by_recency(&self) -> Vec<Capability> {
        let catalog = self.catalog.read().await;
        let mut entries: Vec<_> = catalog.values().collect();
        entries.sort_by_key(|entry| entry.discovered_seq);
        entries
            .into_iter()
            .flat_map(|entry| entry.capabilities.iter().cloned())
            .collect()
    }

    /// Find a capability by name alone
    ///
    /// Several providers may expose the same name; the one discovered most
    /// recently wins and the ambiguity is logged.
    pub async fn find_capability(&self, name: &str) -> Option<Capability> {
        let catalog = self.catalog.read().await;
        let mut matches: Vec<(u64, &Capability)> = catalog
            .values()
            .filter_map(|entry| {
                entry
                    .capabilities
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| (entry.discovered_seq, c))
            })
            .collect();
        matches.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));

        if matches.len() > 1 {
            let providers: Vec<_> = matches.iter().map(|(_, c)| c.provider.as_str()).collect();
            tracing::warn!(
                "Capability '{}' is exposed by {:?}; using '{}' (most recently discovered)",
                name,
                providers,
                providers[0]
            );
        }
        matches.first().map(|(_, c)| (*c).clone())
    }

    // ---- Execution history ----

    pub async fn execution_history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        self.tracker.history(limit).await
    }

    pub async fn execution(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.tracker.get(id).await
    }

    pub async fn clear_history(&self) {
        self.tracker.clear().await;
    }

    // ---- Accessors ----

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub fn supported_transports(&self) -> Vec<TransportKind> {
        self.table.kinds()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a customized broker
///
/// Example:
///     let broker = Broker::builder()
///         .config(config)
///         .adapter(TransportKind::Http, factory)
///         .build()?;
pub struct BrokerBuilder {
    config: Option<BrokerConfig>,
    policy: Option<TimeoutPolicy>,
    table: AdapterTable,
    events: Option<EventBus>,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            policy: None,
            table: AdapterTable::with_defaults(),
            events: None,
        }
    }

    /// Timeout policy comes from the config unless `policy` is also set
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Override the adapter factory for one transport kind
    pub fn adapter(mut self, kind: TransportKind, factory: AdapterFactory) -> Self {
        self.table.register(kind, factory);
        self
    }

    /// Replace the whole dispatch table
    pub fn adapter_table(mut self, table: AdapterTable) -> Self {
        self.table = table;
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the broker; providers in the config are not registered here
    pub fn build(self) -> Result<Broker> {
        let policy = match (self.policy, &self.config) {
            (Some(policy), _) => policy,
            (None, Some(config)) => {
                config.validate()?;
                TimeoutPolicy::from_config(config)?
            }
            (None, None) => TimeoutPolicy::default(),
        };

        Ok(Broker::from_parts(
            self.table,
            policy,
            self.events.unwrap_or_default(),
        ))
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
