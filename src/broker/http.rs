//! HTTP Transport
//!
//! Design Decision: Stateless request/response, one POST per JSON-RPC message
//!
//! HTTP providers receive each JSON-RPC message as a POST body and answer
//! with either a JSON body or a short `text/event-stream` whose `data:`
//! lines carry the response. A server may assign an `Mcp-Session-Id` on
//! `initialize`; it is echoed on every later request and released with a
//! DELETE on disconnect.
//!
//! Unlike the persistent transports, discovery always asks the provider:
//! HTTP servers are free to change their tool set between requests.
//!
//! Timeouts: the provider's `timeout` bounds connection setup, the handshake,
//! `tools/list` and the session release. `tools/call` carries no request
//! timeout; the broker's invocation timeout governs it.
//!
//! Thread Safety: reqwest's `Client` is internally pooled and cloneable, so
//! concurrent invocations run in parallel without a session lock.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::broker::adapter::TransportAdapter;
use crate::broker::config::{ProviderConfig, TransportKind};
use crate::broker::protocol::{
    self, match_response, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ToolCallParams,
};
use crate::broker::schema::{Arguments, Capability, InvocationResult};
use crate::error::{BrokerError, Result};

/// Header carrying the server-assigned session
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// Parse an HTTP response body as the JSON-RPC response to `id`
///
/// Event streams are scanned for the first `data:` payload answering `id`.
/// Plain JSON bodies are taken as the response without an id check: one
/// POST carries exactly one exchange.
pub fn parse_response_body(body: &str, content_type: &str, id: &RequestId) -> Result<JsonRpcResponse> {
    if content_type.starts_with("text/event-stream") {
        return body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .find_map(|data| match_response(data, id))
            .ok_or_else(|| BrokerError::Protocol("Event stream carried no response".into()));
    }
    serde_json::from_str(body.trim())
        .map_err(|e| BrokerError::Protocol(format!("Invalid JSON-RPC response body: {}", e)))
}

/// Connection state established by a successful handshake
struct HttpSession {
    client: Client,
    url: String,
    provider: String,
    auth_header: Option<(String, String)>,
    session_id: RwLock<Option<String>>,
    request_timeout: Duration,
}

impl HttpSession {
    /// POST one message; `timeout` of `None` leaves the request unbounded
    async fn post<T: Serialize + Sync>(&self, body: &T, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_VALUE)
            .json(body);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        if let Some((ref name, ref value)) = self.auth_header {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref session_id) = *self.session_id.read().await {
            builder = builder.header(SESSION_HEADER, session_id.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("HTTP request to '{}' failed: {}", self.provider, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::Transport(format!("HTTP {}: {}", status, text)));
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }
        Ok(response)
    }

    async fn request(&self, request: JsonRpcRequest, timeout: Option<Duration>) -> Result<JsonRpcResponse> {
        let response = self.post(&request, timeout).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to read HTTP response: {}", e)))?;

        parse_response_body(&body, &content_type, &request.id)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.post(&notification, Some(self.request_timeout)).await.map(|_| ())
    }

    async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let mut builder = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, session_id)
            .timeout(self.request_timeout);
        if let Some((ref name, ref value)) = self.auth_header {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Err(e) = builder.send().await {
            tracing::debug!("Failed to release HTTP session for '{}': {}", self.provider, e);
        }
    }
}

/// Adapter for providers reachable over plain HTTP(S)
pub struct HttpAdapter {
    session: RwLock<Option<Arc<HttpSession>>>,
    capabilities: RwLock<Option<Vec<Capability>>>,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            capabilities: RwLock::new(None),
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn current_session(&self) -> Result<Arc<HttpSession>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.session.read().await.clone().ok_or(BrokerError::NotConnected)
    }

    async fn handshake(&self, config: &ProviderConfig) -> Result<HttpSession> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| BrokerError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let session = HttpSession {
            client,
            url: config.url.clone(),
            provider: config.name.clone(),
            auth_header: config.auth_header()?,
            session_id: RwLock::new(None),
            request_timeout: config.request_timeout(),
        };

        let request = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(serde_json::to_value(InitializeParams::for_client())?),
        );
        let response = session.request(request, Some(session.request_timeout)).await?;
        let result: InitializeResult = serde_json::from_value(response.into_result("initialize")?)?;
        if result.protocol_version != protocol::PROTOCOL_VERSION {
            tracing::warn!(
                "Provider '{}' speaks protocol {} (client: {})",
                config.name,
                result.protocol_version,
                protocol::PROTOCOL_VERSION
            );
        }

        session
            .notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;
        Ok(session)
    }
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for HttpAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self, config: &ProviderConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| BrokerError::connection(&config.name, e.to_string()))?;

        let mut guard = self.session.write().await;
        if guard.is_some() && self.is_connected() {
            return Ok(());
        }

        let session = self
            .handshake(config)
            .await
            .map_err(|e| BrokerError::connection(&config.name, e.to_string()))?;

        tracing::debug!("HTTP provider '{}' initialized at {}", config.name, config.url);
        *guard = Some(Arc::new(session));
        *self.capabilities.write().await = None;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.write().await.take() {
            session.close().await;
        }
        *self.capabilities.write().await = None;
    }

    async fn discover_capabilities(&self) -> Result<Vec<Capability>> {
        let session = self.current_session().await?;
        let request = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let value = session
            .request(request, Some(session.request_timeout))
            .await?
            .into_result("tools/list")?;
        let tools = protocol::parse_tool_list(value, &session.provider)?;

        *self.capabilities.write().await = Some(tools.clone());
        Ok(tools)
    }

    async fn invoke(&self, capability: &str, arguments: &Arguments) -> Result<InvocationResult> {
        let session = self.current_session().await?;
        if let Some(known) = self.capabilities.read().await.as_ref() {
            if !known.iter().any(|c| c.name == capability) {
                return Err(BrokerError::capability_not_found(&session.provider, capability));
            }
        }

        let started = Instant::now();
        let params = serde_json::to_value(ToolCallParams {
            name: capability.to_string(),
            arguments: serde_json::Value::Object(arguments.clone()),
        })?;
        let request = JsonRpcRequest::new(self.next_id(), "tools/call", Some(params));

        Ok(match session.request(request, None).await {
            Ok(response) => protocol::call_outcome(response, started.elapsed()),
            Err(e) => InvocationResult::failure(e.to_string(), started.elapsed()),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
