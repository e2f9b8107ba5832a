//! Agent-facing execution boundary
//!
//! An agent loop receives tool calls from a model as a function name plus a
//! JSON argument string and wants text back to feed into the next turn. This
//! trait is that seam: the loop depends on it, not on `Broker`, so a
//! `ToolSet` (or a test double) can stand behind it.
//!
//! Errors cross this boundary as `anyhow::Error`: the agent only relays the
//! message, it never matches on the broker's error kinds.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Whether `tool_name` is on this executor's menu
    fn supports(&self, tool_name: &str) -> bool;

    /// Run one model-issued tool call
    ///
    /// `arguments` is the raw JSON object text from the model; an empty
    /// string means "no arguments". The returned text is the tool's payload,
    /// unquoted when the payload is a plain string.
    async fn execute_tool(&self, tool_name: &str, arguments: &str) -> Result<String>;
}
