//! Provider Wire Protocol
//!
//! Design Decision: One JSON-RPC 2.0 dialect for all three transports
//!
//! Every transport frames the same messages: the `initialize` handshake,
//! the `notifications/initialized` notification, `tools/list` and
//! `tools/call` (MCP method names, protocol version 2024-11-05). Only the
//! framing differs: newline-delimited on stdio, one text frame per message on
//! WebSocket, one POST body per message on HTTP.
//!
//! This module also owns the translation from wire payloads to broker
//! schema types, so the adapters share one mapping of `tools/call` results
//! to `InvocationResult`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::broker::schema::{Capability, InvocationResult, ParameterSchema};
use crate::error::{BrokerError, Result};

/// Protocol version sent in the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name sent in the handshake
pub const CLIENT_NAME: &str = "toolbroker";

pub fn client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// JSON-RPC 2.0 Request
///
/// Example:
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "method": "tools/list" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC 2.0 Response: either `result` or `error` is present, never both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the `result` member, turning an `error` member into a protocol error
    pub fn into_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(BrokerError::Protocol(format!(
                "{} failed: {} (code: {})",
                method, error.message, error.code
            )));
        }
        self.result
            .ok_or_else(|| BrokerError::Protocol(format!("No result in {} response", method)))
    }
}

/// JSON-RPC allows request IDs to be either numbers or strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

/// JSON-RPC 2.0 Error Object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Try to read a line/frame/body as the response to `id`
///
/// Returns `None` for anything else a provider may interleave: server
/// notifications, responses to other ids, log lines on stdout.
pub fn match_response(raw: &str, id: &RequestId) -> Option<JsonRpcResponse> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    if value.get("method").is_some() {
        return None;
    }
    let response: JsonRpcResponse = serde_json::from_value(value).ok()?;
    (&response.id == id).then_some(response)
}

/// `initialize` request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: PeerInfo,
}

impl InitializeParams {
    pub fn for_client() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: PeerInfo {
                name: CLIENT_NAME.to_string(),
                version: client_version(),
            },
        }
    }
}

/// `initialize` result (only the parts the broker reads)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "serverInfo", default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

/// Tool as listed by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    /// Convert to a broker capability stamped with `provider`
    ///
    /// Schemas outside the supported subset degrade to an unconstrained
    /// object rather than dropping the tool.
    pub fn into_capability(self, provider: &str) -> Capability {
        let parameters = match self.input_schema {
            Value::Null => ParameterSchema::object(),
            schema => serde_json::from_value(schema).unwrap_or_else(|e| {
                tracing::warn!(
                    "Provider '{}' tool '{}' has an unsupported input schema: {}",
                    provider,
                    self.name,
                    e
                );
                ParameterSchema::object()
            }),
        };
        let result_schema = self
            .output_schema
            .and_then(|schema| serde_json::from_value(schema).ok());

        Capability {
            name: self.name,
            description: self.description.unwrap_or_default(),
            parameters,
            result_schema,
            provider: provider.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResult {
    pub tools: Vec<ToolDescriptor>,
}

/// `tools/call` request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

/// `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Output content block; non-text blocks carry no `text`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ToolCallResult {
    fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Map to a broker result
    ///
    /// - `isError: true` → business failure carrying the joined text
    /// - `structuredContent` → payload as-is
    /// - otherwise the joined text, parsed as JSON when it is JSON
    pub fn into_invocation_result(self, elapsed: Duration) -> InvocationResult {
        let text = self.joined_text();
        if self.is_error == Some(true) {
            let message = if text.is_empty() { "tool reported an error".to_string() } else { text };
            return InvocationResult::failure(message, elapsed);
        }
        if let Some(structured) = self.structured_content {
            return InvocationResult::success(structured, elapsed);
        }
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));
        InvocationResult::success(data, elapsed)
    }
}

/// Map a raw `tools/call` JSON-RPC response to a broker result
///
/// JSON-RPC error members and malformed results are business failures:
/// the exchange itself completed.
pub fn call_outcome(response: JsonRpcResponse, elapsed: Duration) -> InvocationResult {
    match response.into_result("tools/call") {
        Ok(value) => match serde_json::from_value::<ToolCallResult>(value) {
            Ok(result) => result.into_invocation_result(elapsed),
            Err(e) => InvocationResult::failure(format!("Malformed tools/call result: {}", e), elapsed),
        },
        Err(e) => InvocationResult::failure(e.to_string(), elapsed),
    }
}

/// Map a raw `tools/list` result to capabilities stamped with `provider`
pub fn parse_tool_list(value: Value, provider: &str) -> Result<Vec<Capability>> {
    let list: ToolListResult = serde_json::from_value(value)?;
    Ok(list
        .tools
        .into_iter()
        .map(|tool| tool.into_capability(provider))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert!(json.get("params").is_none());

        let note = serde_json::to_value(JsonRpcNotification::new("notifications/initialized")).unwrap();
        assert!(note.get("id").is_none());
    }

    #[test]
    fn test_match_response_skips_noise() {
        let id = RequestId::Number(7);
        assert!(match_response("starting server...", &id).is_none());
        assert!(match_response(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#, &id).is_none());
        assert!(match_response(r#"{"jsonrpc":"2.0","id":6,"result":{}}"#, &id).is_none());

        let response = match_response(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#, &id).unwrap();
        assert_eq!(response.result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_into_result_error_member() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        }))
        .unwrap();

        let err = response.into_result("tools/list").unwrap_err();
        assert!(err.to_string().contains("Method not found"));
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn test_tool_list_stamps_provider() {
        let caps = parse_tool_list(
            json!({
                "tools": [
                    { "name": "read_file", "description": "Read a file",
                      "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] } },
                    { "name": "ping" }
                ]
            }),
            "files",
        )
        .unwrap();

        assert_eq!(caps.len(), 2);
        assert!(caps.iter().all(|c| c.provider == "files"));
        assert_eq!(caps[0].parameters.required, vec!["path".to_string()]);
        assert_eq!(caps[1].description, "");
    }

    #[test]
    fn test_call_result_mapping() {
        let elapsed = Duration::from_millis(5);

        let ok: ToolCallResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "{\"temp\": 21}" }]
        }))
        .unwrap();
        let result = ok.into_invocation_result(elapsed);
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"temp": 21})));

        let plain: ToolCallResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "sunny" }, { "type": "image" }]
        }))
        .unwrap();
        assert_eq!(plain.into_invocation_result(elapsed).data, Some(json!("sunny")));

        let failed: ToolCallResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "city unknown" }],
            "isError": true
        }))
        .unwrap();
        let result = failed.into_invocation_result(elapsed);
        assert!(!result.success);
        assert_eq!(result.error_message(), "city unknown");
    }

    #[test]
    fn test_call_outcome_rpc_error_is_business_failure() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 3,
            "error": { "code": -32602, "message": "Invalid params" }
        }))
        .unwrap();

        let result = call_outcome(response, Duration::from_millis(1));
        assert!(!result.success);
        assert!(result.error_message().contains("Invalid params"));
    }
}
