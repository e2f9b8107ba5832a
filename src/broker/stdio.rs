//! Subprocess (stdio) Transport
//!
//! Design Decision: Process-based stdio communication for local providers
//!
//! Local providers are spawned as child processes and exchange
//! newline-delimited JSON-RPC 2.0 messages over stdin/stdout. The provider's
//! `url` is the command line; when `args` is set, `url` is the program alone.
//!
//! Error Recovery Strategy:
//! - Spawn failure: connection error, adapter stays disconnected
//! - EOF on stdout (process died): transport error, channel marked disconnected
//! - Non-JSON lines on stdout: skipped (servers sometimes log there)
//! - Dropped without close(): the child is killed (`kill_on_drop`)

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::broker::channel::{RpcChannel, SessionAdapter};
use crate::broker::config::{resolve_env_var, ProviderConfig, TransportKind};
use crate::broker::protocol::{match_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::error::{BrokerError, Result};

/// Subprocess adapter: a session adapter over a child process
pub type StdioAdapter = SessionAdapter<StdioChannel>;

/// Split a provider's command line into program and arguments
///
/// Explicit `args` win; otherwise `url` is split on whitespace.
pub fn command_line(config: &ProviderConfig) -> Result<(String, Vec<String>)> {
    if !config.args.is_empty() {
        return Ok((config.url.trim().to_string(), config.args.clone()));
    }
    let mut parts = config.url.split_whitespace().map(String::from);
    let program = parts
        .next()
        .ok_or_else(|| BrokerError::Config(format!("Provider '{}' has empty command", config.name)))?;
    Ok((program, parts.collect()))
}

/// Child process channel
///
/// Protocol:
/// - Client writes JSON-RPC request followed by newline to stdin
/// - Server writes JSON-RPC response followed by newline to stdout
/// - Client reads lines until the response id matches
pub struct StdioChannel {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    connected: bool,
}

impl StdioChannel {
    async fn write_line(&mut self, json: String) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BrokerError::Transport("No stdin available".into()))?;

        let mut line = json.into_bytes();
        line.push(b'\n');

        let written = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            self.connected = false;
            BrokerError::Transport(format!("Failed to write to provider process: {}", e))
        })
    }

    async fn read_line(&mut self) -> Result<String> {
        let reader = self
            .stdout
            .as_mut()
            .ok_or_else(|| BrokerError::Transport("No stdout available".into()))?;

        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to read from provider process: {}", e)))?;

        if read == 0 {
            self.connected = false;
            return Err(BrokerError::Transport("Provider process closed stdout (EOF)".into()));
        }
        Ok(line)
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    const KIND: TransportKind = TransportKind::Stdio;

    async fn open(config: &ProviderConfig) -> Result<Self> {
        let (program, args) = command_line(config)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        for (key, value) in &config.env {
            cmd.env(key, resolve_env_var(value)?);
        }
        if let Some(ref working_dir) = config.working_dir {
            cmd.current_dir(working_dir);
        }

        // stderr is inherited so provider diagnostics stay visible
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            BrokerError::Transport(format!(
                "Failed to spawn provider '{}': {} (command: {})",
                config.name, e, program
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Transport("Failed to capture stdin for provider".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Transport("Failed to capture stdout for provider".into()))?;

        tracing::debug!("Spawned provider '{}': {} {:?}", config.name, program, args);

        Ok(Self {
            process: Some(child),
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            connected: true,
        })
    }

    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.connected {
            return Err(BrokerError::Transport("Provider process not running".into()));
        }

        self.write_line(serde_json::to_string(&request)?).await?;

        loop {
            let line = self.read_line().await?;
            if let Some(response) = match_response(&line, &request.id) {
                return Ok(response);
            }
            tracing::trace!("Skipping unrelated provider output: {}", line.trim_end());
        }
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        if !self.connected {
            return Err(BrokerError::Transport("Provider process not running".into()));
        }
        self.write_line(serde_json::to_string(&notification)?).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.stdin = None;
        self.stdout = None;

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                tracing::warn!("Failed to kill provider process: {}", e);
            }
        }
        Ok(())
    }
}
