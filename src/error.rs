// Centralized error handling using thiserror for type-safe error management
//
// Design Decision: One error taxonomy for the whole broker
//
// Rationale: A calling agent has to tell a timeout apart from a missing tool
// or a dead provider so it can decide whether to retry, apologize or fall
// back. Every protocol-level failure is a distinct variant, and `kind()`
// exposes a stable discriminator that survives serialization.
//
// Business failures (the tool ran and reported an error) are NOT part of
// this enum on the broker path: they travel as `InvocationResult` data.
// `ToolFailed` only exists for the schema bridge, which re-raises them.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the tool broker
///
/// Error Handling Strategy:
/// - Connection errors: provider marked errored, surfaced to the registering caller
/// - Timeout errors: execution record ends as `timed_out`, never retried here
/// - Not-found errors: raised before dispatch, no timeout racing happens
/// - IO / JSON errors: automatically converted via #[from]
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A provider could not be reached or its handshake failed
    #[error("Connection error for provider '{provider}': {message}")]
    Connection { provider: String, message: String },

    /// An invocation exceeded its effective timeout
    #[error(
        "Timeout: '{capability}' on provider '{provider}' did not complete within {}ms",
        .timeout.as_millis()
    )]
    Timeout {
        provider: String,
        capability: String,
        timeout: Duration,
    },

    /// Capability name is not in the provider's current catalog
    #[error("Capability not found: '{capability}' on provider '{provider}'")]
    CapabilityNotFound { provider: String, capability: String },

    /// Provider config names a transport with no registered adapter
    #[error("Unsupported transport '{transport}' for provider '{provider}'")]
    UnsupportedTransport { provider: String, transport: String },

    /// Provider name is not registered
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider is registered but its status is not `connected`
    #[error("Provider not connected: {0}")]
    ProviderNotConnected(String),

    /// Adapter operation attempted before connect() or after disconnect()
    #[error("Transport not connected")]
    NotConnected,

    /// Configuration file or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failed after the connection was established
    ///
    /// Examples: broken pipe, socket closed, HTTP status error
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON-RPC violation or unexpected message from a provider
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A tool ran but reported failure (raised by the schema bridge only)
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable, serializable discriminator for [`BrokerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    CapabilityNotFound,
    UnsupportedTransport,
    ProviderNotFound,
    ProviderNotConnected,
    NotConnected,
    Config,
    Transport,
    Protocol,
    ToolFailed,
    Io,
    Json,
}

impl BrokerError {
    /// Discriminator for callers that branch on the failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Connection { .. } => ErrorKind::Connection,
            BrokerError::Timeout { .. } => ErrorKind::Timeout,
            BrokerError::CapabilityNotFound { .. } => ErrorKind::CapabilityNotFound,
            BrokerError::UnsupportedTransport { .. } => ErrorKind::UnsupportedTransport,
            BrokerError::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            BrokerError::ProviderNotConnected(_) => ErrorKind::ProviderNotConnected,
            BrokerError::NotConnected => ErrorKind::NotConnected,
            BrokerError::Config(_) => ErrorKind::Config,
            BrokerError::Transport(_) => ErrorKind::Transport,
            BrokerError::Protocol(_) => ErrorKind::Protocol,
            BrokerError::ToolFailed { .. } => ErrorKind::ToolFailed,
            BrokerError::Io(_) => ErrorKind::Io,
            BrokerError::Json(_) => ErrorKind::Json,
        }
    }

    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        BrokerError::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn capability_not_found(provider: impl Into<String>, capability: impl Into<String>) -> Self {
        BrokerError::CapabilityNotFound {
            provider: provider.into(),
            capability: capability.into(),
        }
    }
}

/// Type alias for Result with BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;
