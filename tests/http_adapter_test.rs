//! HTTP transport tests against a local mock provider
//!
//! Each test mounts JSON-RPC responses on a wiremock server keyed by the
//! request's `method`, then drives the real `HttpAdapter` through the broker.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolbroker::broker::{
    AuthConfig, Broker, HttpAdapter, InvocationRequest, ProviderConfig, ProviderStatus, TransportAdapter,
    TransportKind,
};
use toolbroker::ErrorKind;

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

async fn mount_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Handshake plus a `search` tool
async fn mount_provider(server: &MockServer) {
    mount_rpc(
        server,
        "initialize",
        rpc_result(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mock-search", "version": "0.1.0" }
        })),
    )
    .await;
    mount_rpc(server, "notifications/initialized", ResponseTemplate::new(202)).await;
    mount_rpc(
        server,
        "tools/list",
        rpc_result(json!({
            "tools": [{
                "name": "search",
                "description": "Search documents",
                "inputSchema": {
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }
            }]
        })),
    )
    .await;
}

fn provider(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new("search", format!("{}/mcp", server.uri()), TransportKind::Http).with_timeout(5_000)
}

#[tokio::test]
async fn test_unknown_capability_is_not_found() {
    let server = MockServer::start().await;
    mount_provider(&server).await;

    let broker = Broker::new();
    let registered = broker.register_provider(provider(&server)).await.unwrap();
    assert_eq!(registered.capabilities.len(), 1);
    assert_eq!(registered.capabilities[0].provider, "search");

    let err = broker
        .invoke(InvocationRequest::new("search", "translate"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityNotFound);
}

#[tokio::test]
async fn test_invoke_maps_text_content() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": { "name": "search", "arguments": { "query": "rust" } }
        })))
        .respond_with(rpc_result(json!({
            "content": [{ "type": "text", "text": "{\"hits\": 3}" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let broker = Broker::new();
    broker.register_provider(provider(&server)).await.unwrap();

    let request = InvocationRequest::new("search", "search").with_argument("query", json!("rust"));
    let result = broker.invoke(request).await.unwrap();
    assert!(result.success);
    assert_eq!(result.data, Some(json!({ "hits": 3 })));
}

#[tokio::test]
async fn test_tool_error_is_business_failure() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    mount_rpc(
        &server,
        "tools/call",
        rpc_result(json!({
            "content": [{ "type": "text", "text": "index offline" }],
            "isError": true
        })),
    )
    .await;

    let broker = Broker::new();
    broker.register_provider(provider(&server)).await.unwrap();

    let result = broker
        .invoke(InvocationRequest::new("search", "search"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error_message(), "index offline");
}

#[tokio::test]
async fn test_bearer_auth_sent_on_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({ "method": "initialize" })))
        .respond_with(rpc_result(json!({ "protocolVersion": "2024-11-05" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer s3cret"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(rpc_result(json!({ "tools": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let config = provider(&server).with_auth(AuthConfig::Bearer {
        token: "s3cret".to_string(),
    });
    let broker = Broker::new();
    let registered = broker.register_provider(config).await.unwrap();
    assert!(registered.capabilities.is_empty());
}

#[tokio::test]
async fn test_session_id_echoed_and_event_stream_parsed() {
    let server = MockServer::start().await;
    mount_rpc(
        &server,
        "initialize",
        rpc_result(json!({ "protocolVersion": "2024-11-05" })).insert_header("Mcp-Session-Id", "session-42"),
    )
    .await;
    mount_rpc(&server, "notifications/initialized", ResponseTemplate::new(202)).await;

    // tools/list is only answered when the session header comes back
    let stream = "event: message\n\
                  data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\n\
                  event: message\n\
                  data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[{\"name\":\"ping\"}]}}\n\n";
    Mock::given(method("POST"))
        .and(header("Mcp-Session-Id", "session-42"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = HttpAdapter::new();
    adapter.connect(&provider(&server)).await.unwrap();
    let tools = adapter.discover_capabilities().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "ping");
}

#[tokio::test]
async fn test_failed_handshake_marks_provider_errored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let broker = Broker::new();
    let err = broker.register_provider(provider(&server)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("500"));

    let entry = broker.provider("search").await.unwrap();
    assert_eq!(entry.status, ProviderStatus::Error);
    assert!(entry.last_error.is_some());
}

#[tokio::test]
async fn test_http_discovery_is_remote_each_time() {
    let server = MockServer::start().await;
    mount_rpc(&server, "initialize", rpc_result(json!({ "protocolVersion": "2024-11-05" }))).await;
    mount_rpc(&server, "notifications/initialized", ResponseTemplate::new(202)).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(rpc_result(json!({ "tools": [{ "name": "ping" }] })))
        .expect(2)
        .mount(&server)
        .await;

    let adapter = HttpAdapter::new();
    adapter.connect(&provider(&server)).await.unwrap();
    let first = adapter.discover_capabilities().await.unwrap();
    let second = adapter.discover_capabilities().await.unwrap();
    assert_eq!(first, second);

    adapter.disconnect().await;
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn test_slow_call_outlives_provider_timeout() {
    let server = MockServer::start().await;
    mount_provider(&server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(
            rpc_result(json!({ "content": [{ "type": "text", "text": "{\"pages\": 12}" }] }))
                .set_delay(Duration::from_millis(1_200)),
        )
        .mount(&server)
        .await;

    // Provider timeout is 300ms; the broker's 10s default governs tools/call
    let broker = Broker::new();
    broker
        .register_provider(provider(&server).with_timeout(300))
        .await
        .unwrap();

    let result = broker
        .invoke(InvocationRequest::new("search", "search"))
        .await
        .unwrap();
    assert!(result.success, "{}", result.error_message());
    assert_eq!(result.data, Some(json!({ "pages": 12 })));
    assert!(result.execution_time >= Duration::from_millis(1_200));
}

#[tokio::test]
async fn test_slow_discovery_bounded_by_provider_timeout() {
    let server = MockServer::start().await;
    mount_rpc(&server, "initialize", rpc_result(json!({ "protocolVersion": "2024-11-05" }))).await;
    mount_rpc(&server, "notifications/initialized", ResponseTemplate::new(202)).await;
    mount_rpc(
        &server,
        "tools/list",
        rpc_result(json!({ "tools": [] })).set_delay(Duration::from_millis(1_500)),
    )
    .await;

    let broker = Broker::new();
    let registered = broker
        .register_provider(provider(&server).with_timeout(300))
        .await
        .unwrap();
    assert!(registered.discovery_error.is_some());
    assert_eq!(broker.provider("search").await.unwrap().status, ProviderStatus::Connected);
}
