//! WebSocket Transport
//!
//! Design Decision: One text frame per JSON-RPC message over a persistent socket
//!
//! Remote providers that keep a long-lived connection speak the same
//! JSON-RPC dialect as the subprocess transport, framed as WebSocket text
//! messages instead of lines. Auth headers are sent on the upgrade request.
//!
//! Frame handling:
//! - Text / Binary: parsed as JSON-RPC, unrelated messages skipped
//! - Ping / Pong: answered by tungstenite, ignored here
//! - Close or end of stream: transport error, channel marked disconnected

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::broker::channel::{RpcChannel, SessionAdapter};
use crate::broker::config::{ProviderConfig, TransportKind};
use crate::broker::protocol::{match_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::error::{BrokerError, Result};

/// WebSocket adapter: a session adapter over one socket
pub type WebSocketAdapter = SessionAdapter<SocketChannel>;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SocketChannel {
    socket: Option<Socket>,
    connected: bool,
}

impl SocketChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(BrokerError::NotConnected)?;
        if let Err(e) = socket.send(Message::Text(text)).await {
            self.connected = false;
            return Err(BrokerError::Transport(format!("WebSocket send failed: {}", e)));
        }
        Ok(())
    }

    /// Next text payload from the socket, skipping control frames
    async fn next_text(&mut self) -> Result<String> {
        let socket = self.socket.as_mut().ok_or(BrokerError::NotConnected)?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    self.connected = false;
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(BrokerError::Transport(format!("WebSocket closed by provider {}", reason)));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(BrokerError::Transport(format!("WebSocket receive failed: {}", e)));
                }
                None => {
                    self.connected = false;
                    return Err(BrokerError::Transport("WebSocket stream ended".into()));
                }
            }
        }
    }
}

#[async_trait]
impl RpcChannel for SocketChannel {
    const KIND: TransportKind = TransportKind::WebSocket;

    async fn open(config: &ProviderConfig) -> Result<Self> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BrokerError::Config(format!("Invalid WebSocket url '{}': {}", config.url, e)))?;

        if let Some((name, value)) = config.auth_header()? {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BrokerError::Config(format!("Invalid auth header name: {}", e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| BrokerError::Config(format!("Invalid auth header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| BrokerError::Transport(format!("WebSocket upgrade failed: {}", e)))?;

        tracing::debug!(
            "WebSocket connected to provider '{}' (status {})",
            config.name,
            response.status()
        );

        Ok(Self {
            socket: Some(socket),
            connected: true,
        })
    }

    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        self.send_text(serde_json::to_string(&request)?).await?;

        loop {
            let text = self.next_text().await?;
            if let Some(response) = match_response(&text, &request.id) {
                return Ok(response);
            }
            tracing::trace!("Skipping unrelated WebSocket message: {}", text);
        }
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        self.send_text(serde_json::to_string(&notification)?).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                tracing::debug!("WebSocket close handshake failed: {}", e);
            }
        }
        Ok(())
    }
}
