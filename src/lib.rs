// Library interface for toolbroker
// Exposes the broker so an agent-orchestration layer can:
// - Register tool providers (subprocess, HTTP, WebSocket)
// - Build function-call menus from discovered capabilities
// - Invoke tools with per-call timeout policy and execution tracking

pub mod broker;
pub mod error;
pub mod events;
pub mod tool_executor;

// Re-export commonly used types for convenience
pub use broker::{
    Broker, BrokerBuilder, BrokerConfig, Capability, InvocationRequest, InvocationResult, ProviderConfig, ToolSet,
    TransportKind,
};
pub use error::{BrokerError, ErrorKind, Result};
pub use events::{BrokerEvent, Event, EventBus};
pub use tool_executor::ToolExecutor;
