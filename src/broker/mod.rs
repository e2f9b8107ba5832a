//! Tool-Execution Broker
//!
//! Lets an agent invoke named capabilities ("tools") that live behind
//! external providers without knowing which transport, server or latency
//! profile backs a given tool.
//!
//! # Architecture Overview
//!
//! 1. **Schema Layer** (`schema.rs`, `config.rs`)
//!    - Capability descriptors, invocation request/result, execution records
//!    - Provider and broker configuration, `${VAR}` substitution for secrets
//!
//! 2. **Transport Layer** (`adapter.rs`, `protocol.rs`, `channel.rs`)
//!    - `TransportAdapter`: connect / disconnect / discover / invoke / is_connected
//!    - `AdapterTable`: dispatch table keyed by transport kind
//!    - JSON-RPC 2.0 messages shared by every transport
//!    - Variants: subprocess (`stdio.rs`), HTTP (`http.rs`), WebSocket (`websocket.rs`)
//!
//! 3. **Bookkeeping Layer** (`registry.rs`, `tracker.rs`, `policy.rs`)
//!    - Provider connection state
//!    - Execution lifecycle with monotonic status transitions
//!    - Two-tier timeout policy
//!
//! 4. **Orchestration Layer** (`manager.rs`)
//!    - Registration, discovery, dispatch, timeout racing, teardown
//!
//! 5. **Agent Boundary** (`bridge.rs`)
//!    - Capabilities as OpenAI-style function definitions
//!    - Pattern-selected `ToolSet` implementing `ToolExecutor`
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use toolbroker::broker::{Broker, InvocationRequest, ProviderConfig, TransportKind};
//!
//! # async fn example() -> toolbroker::Result<()> {
//! let broker = Broker::new();
//! broker
//!     .register_provider(ProviderConfig::new("weather", "https://weather.example/mcp", TransportKind::Http))
//!     .await?;
//!
//! let request = InvocationRequest::new("weather", "get_forecast")
//!     .with_argument("city", serde_json::json!("Oslo"));
//! let result = broker.invoke(request).await?;
//! println!("{:?}", result.data);
//!
//! broker.disconnect_all().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod http;
pub mod manager;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod stdio;
pub mod tracker;
pub mod websocket;

pub use adapter::{AdapterFactory, AdapterTable, TransportAdapter};
pub use bridge::{BrokerTool, FunctionDefinition, ToolDefinition, ToolSet};
pub use config::{AuthConfig, BrokerConfig, ProviderConfig, TransportKind};
pub use http::HttpAdapter;
pub use manager::{Broker, BrokerBuilder, RegisteredProvider, RegistrationOutcome};
pub use policy::TimeoutPolicy;
pub use registry::{ProviderEntry, ProviderStatus};
pub use schema::{
    Arguments, Capability, ExecutionId, ExecutionRecord, ExecutionStatus, InvocationRequest, InvocationResult,
    ParameterSchema, SchemaType,
};
pub use stdio::StdioAdapter;
pub use tracker::ExecutionTracker;
pub use websocket::WebSocketAdapter;
