//! Persistent JSON-RPC Channels
//!
//! Design Decision: Transport-agnostic session over a framing trait
//!
//! The subprocess and WebSocket transports both hold one long-lived
//! bidirectional connection. `RpcChannel` captures only the framing
//! (send a request and read until the matching response, send a
//! notification, close); `RpcSession` layers the protocol on top
//! (handshake, `tools/list`, `tools/call`); `SessionAdapter` turns a
//! session into a `TransportAdapter`.
//!
//! Protocol Flow:
//! 1. initialize: Client → Server (capabilities exchange)
//! 2. notifications/initialized: Client → Server (no response)
//! 3. tools/list: fetched once, then served from the local cache
//! 4. tools/call: one exchange per invocation
//!
//! A channel carries one exchange at a time, so `SessionAdapter` keeps the
//! session behind a mutex: concurrent invocations on the same provider queue
//! on the transport, not in the broker.
//!
//! Shutdown: `tools/call` has no transport-level bound, so an exchange can
//! hold the session lock indefinitely. `disconnect` first raises a shutdown
//! signal that every pending invocation selects on; they give up the lock
//! with a failed result and the channel is then closed.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};

use crate::broker::adapter::TransportAdapter;
use crate::broker::config::{ProviderConfig, TransportKind};
use crate::broker::protocol::{
    self, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ToolCallParams,
};
use crate::broker::schema::{Arguments, Capability, InvocationResult};
use crate::error::{BrokerError, Result};

/// Framing for one persistent connection
#[async_trait]
pub trait RpcChannel: Send + Sync + 'static {
    /// Transport kind this channel implements
    const KIND: TransportKind;

    /// Open the underlying connection (spawn process, socket upgrade)
    async fn open(config: &ProviderConfig) -> Result<Self>
    where
        Self: Sized;

    /// Send a request and wait for the response carrying the same id
    ///
    /// Anything else the peer sends in between is skipped.
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a message that expects no response
    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Close the connection; idempotent
    async fn close(&mut self) -> Result<()>;
}

/// Protocol session over one channel
///
/// State Machine:
/// - Created → initialize() → Initialized
/// - Initialized → list_tools(), call_tool()
pub struct RpcSession<C: RpcChannel> {
    channel: C,
    provider: String,
    initialized: bool,
    server: Option<InitializeResult>,
    next_id: u64,
}

impl<C: RpcChannel> RpcSession<C> {
    pub fn new(channel: C, provider: impl Into<String>) -> Self {
        Self {
            channel,
            provider: provider.into(),
            initialized: false,
            server: None,
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Run the `initialize` / `notifications/initialized` handshake
    pub async fn initialize(&mut self) -> Result<&InitializeResult> {
        if !self.initialized {
            let request = JsonRpcRequest::new(
                self.next_id(),
                "initialize",
                Some(serde_json::to_value(InitializeParams::for_client())?),
            );
            let result: InitializeResult =
                serde_json::from_value(self.channel.send_request(request).await?.into_result("initialize")?)?;

            if result.protocol_version != protocol::PROTOCOL_VERSION {
                tracing::warn!(
                    "Provider '{}' speaks protocol {} (client: {})",
                    self.provider,
                    result.protocol_version,
                    protocol::PROTOCOL_VERSION
                );
            }

            self.channel
                .send_notification(JsonRpcNotification::new("notifications/initialized"))
                .await?;
            self.server = Some(result);
            self.initialized = true;
        }

        self.server
            .as_ref()
            .ok_or_else(|| BrokerError::Protocol("Handshake produced no server info".into()))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<Capability>> {
        if !self.initialized {
            return Err(BrokerError::Protocol(
                "Session not initialized - call initialize() first".into(),
            ));
        }
        let request = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let value = self.channel.send_request(request).await?.into_result("tools/list")?;
        protocol::parse_tool_list(value, &self.provider)
    }

    /// Call a tool; every failure past this point is a failed result
    pub async fn call_tool(&mut self, name: &str, arguments: &Arguments) -> InvocationResult {
        let started = Instant::now();
        if !self.initialized {
            return InvocationResult::failure("Session not initialized", started.elapsed());
        }

        let params = ToolCallParams {
            name: name.to_string(),
            arguments: serde_json::Value::Object(arguments.clone()),
        };
        let request = match serde_json::to_value(params) {
            Ok(params) => JsonRpcRequest::new(self.next_id(), "tools/call", Some(params)),
            Err(e) => return InvocationResult::failure(e.to_string(), started.elapsed()),
        };

        match self.channel.send_request(request).await {
            Ok(response) => protocol::call_outcome(response, started.elapsed()),
            Err(e) => InvocationResult::failure(e.to_string(), started.elapsed()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn close(&mut self) -> Result<()> {
        self.initialized = false;
        self.channel.close().await
    }
}

/// `TransportAdapter` over a persistent session
///
/// Discovery is computed locally after the first successful `tools/list`:
/// the provider's advertised set is fixed for the lifetime of the connection.
pub struct SessionAdapter<C: RpcChannel> {
    session: Mutex<Option<RpcSession<C>>>,
    capabilities: RwLock<Option<Vec<Capability>>>,
    provider: RwLock<String>,
    request_timeout: RwLock<Duration>,
    connected: AtomicBool,
    /// `true` while a disconnect is tearing the session down
    shutdown: watch::Sender<bool>,
    _channel: PhantomData<fn() -> C>,
}

impl<C: RpcChannel> SessionAdapter<C> {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            capabilities: RwLock::new(None),
            provider: RwLock::new(String::new()),
            request_timeout: RwLock::new(Duration::from_millis(crate::broker::config::DEFAULT_REQUEST_TIMEOUT_MS)),
            connected: AtomicBool::new(false),
            shutdown: watch::Sender::new(false),
            _channel: PhantomData,
        }
    }

    async fn open_session(config: &ProviderConfig) -> Result<RpcSession<C>> {
        let channel = C::open(config).await?;
        let mut session = RpcSession::new(channel, config.name.clone());
        let handshake = session.initialize().await.map(|_| ());
        if let Err(e) = handshake {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }
}

impl<C: RpcChannel> Default for SessionAdapter<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: RpcChannel> TransportAdapter for SessionAdapter<C> {
    fn kind(&self) -> TransportKind {
        C::KIND
    }

    async fn connect(&self, config: &ProviderConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| BrokerError::connection(&config.name, e.to_string()))?;

        let mut guard = self.session.lock().await;
        if guard.is_some() && self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let timeout = config.request_timeout();
        let session = match tokio::time::timeout(timeout, Self::open_session(config)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(BrokerError::connection(&config.name, e.to_string())),
            Err(_) => {
                return Err(BrokerError::connection(
                    &config.name,
                    format!("handshake timed out after {}ms", timeout.as_millis()),
                ))
            }
        };

        *guard = Some(session);
        self.shutdown.send_replace(false);
        *self.provider.write().await = config.name.clone();
        *self.request_timeout.write().await = timeout;
        *self.capabilities.write().await = None;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Pending exchanges drop the session lock once they see this
        self.shutdown.send_replace(true);
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.close().await {
                tracing::warn!("Error closing {} channel: {}", C::KIND, e);
            }
        }
        *self.capabilities.write().await = None;
    }

    async fn discover_capabilities(&self) -> Result<Vec<Capability>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if let Some(cached) = self.capabilities.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let timeout = *self.request_timeout.read().await;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(BrokerError::NotConnected)?;
        let tools = tokio::time::timeout(timeout, session.list_tools())
            .await
            .map_err(|_| BrokerError::Transport(format!("tools/list timed out after {}ms", timeout.as_millis())))??;

        *self.capabilities.write().await = Some(tools.clone());
        Ok(tools)
    }

    async fn invoke(&self, capability: &str, arguments: &Arguments) -> Result<InvocationResult> {
        let mut shutdown = self.shutdown.subscribe();
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if let Some(known) = self.capabilities.read().await.as_ref() {
            if !known.iter().any(|c| c.name == capability) {
                let provider = self.provider.read().await.clone();
                return Err(BrokerError::capability_not_found(provider, capability));
            }
        }

        let started = Instant::now();
        let exchange = async {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(BrokerError::NotConnected)?;
            let result = session.call_tool(capability, arguments).await;
            if !session.is_connected() {
                self.connected.store(false, Ordering::SeqCst);
            }
            Ok::<_, BrokerError>(result)
        };
        let closing = async {
            let _ = shutdown.wait_for(|closing| *closing).await;
        };

        // Dropping `exchange` releases the session lock
        let mut result = tokio::select! {
            result = exchange => result?,
            _ = closing => {
                InvocationResult::failure("Provider disconnected during the call", started.elapsed())
            }
        };
        result.execution_time = started.elapsed();
        Ok(result)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted channel: answers each request with the next queued result
    struct ScriptedChannel {
        results: VecDeque<serde_json::Value>,
        notifications: Vec<String>,
        connected: bool,
    }

    impl ScriptedChannel {
        fn new(results: Vec<serde_json::Value>) -> Self {
            Self {
                results: results.into(),
                notifications: Vec::new(),
                connected: true,
            }
        }
    }

    #[async_trait]
    impl RpcChannel for ScriptedChannel {
        const KIND: TransportKind = TransportKind::Stdio;

        async fn open(_config: &ProviderConfig) -> Result<Self> {
            Ok(Self::new(vec![
                json!({ "protocolVersion": "2024-11-05", "capabilities": { "tools": {} } }),
                json!({ "tools": [{ "name": "echo", "description": "Echo input" }] }),
                json!({ "content": [{ "type": "text", "text": "{\"echo\": true}" }] }),
            ]))
        }

        async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            let result = self
                .results
                .pop_front()
                .ok_or_else(|| BrokerError::Transport("No more responses".into()))?;
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: Some(result),
                error: None,
            })
        }

        async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
            self.notifications.push(notification.method);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_session_requires_initialization() {
        let mut session = RpcSession::new(ScriptedChannel::new(vec![]), "scripted");
        let result = session.list_tools().await;
        assert!(result.unwrap_err().to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_handshake_sends_initialized_notification() {
        let channel = ScriptedChannel::new(vec![json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": { "name": "scripted", "version": "1.0.0" }
        })]);
        let mut session = RpcSession::new(channel, "scripted");

        let info = session.initialize().await.unwrap();
        assert_eq!(info.server_info.as_ref().unwrap().name, "scripted");
        assert_eq!(session.channel.notifications, vec!["notifications/initialized".to_string()]);

        // Second call is served from the stored handshake
        assert!(session.initialize().await.is_ok());
    }

    #[tokio::test]
    async fn test_call_tool_transport_failure_is_failed_result() {
        let channel = ScriptedChannel::new(vec![json!({ "protocolVersion": "2024-11-05" })]);
        let mut session = RpcSession::new(channel, "scripted");
        session.initialize().await.unwrap();

        let result = session.call_tool("echo", &Arguments::new()).await;
        assert!(!result.success);
        assert!(result.error_message().contains("No more responses"));
    }

    #[tokio::test]
    async fn test_session_adapter_lifecycle() {
        let adapter: SessionAdapter<ScriptedChannel> = SessionAdapter::new();
        let config = ProviderConfig::new("scripted", "scripted-server", TransportKind::Stdio);

        assert!(matches!(
            adapter.discover_capabilities().await,
            Err(BrokerError::NotConnected)
        ));

        adapter.connect(&config).await.unwrap();
        assert!(adapter.is_connected());

        let first = adapter.discover_capabilities().await.unwrap();
        let second = adapter.discover_capabilities().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].provider, "scripted");

        let missing = adapter.invoke("nope", &Arguments::new()).await;
        assert!(matches!(missing, Err(BrokerError::CapabilityNotFound { .. })));

        let result = adapter.invoke("echo", &Arguments::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"echo": true})));

        adapter.disconnect().await;
        assert!(!adapter.is_connected());
        assert!(matches!(
            adapter.invoke("echo", &Arguments::new()).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_validates_config() {
        let adapter: SessionAdapter<ScriptedChannel> = SessionAdapter::new();
        let config = ProviderConfig::new("scripted", "", TransportKind::Stdio);

        let err = adapter.connect(&config).await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection { .. }));
        assert!(!adapter.is_connected());
    }
}
