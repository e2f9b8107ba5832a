//! Broker Configuration Types
//!
//! Design Decision: JSON-based configuration with environment variable substitution
//!
//! Provider configs arrive either one at a time from the calling layer
//! (`Broker::register_provider`) or in bulk from a `BrokerConfig` file.
//! Secrets (tokens, passwords, API keys, subprocess env values) may be written
//! as `${VAR_NAME}` and are resolved at connect time, never at load time.
//!
//! File Format: JSON
//! Location: ~/.toolbroker/config.json (or user-specified path)
//!
//! Example:
//!     {
//!       "providers": [
//!         { "name": "files", "url": "npx -y @modelcontextprotocol/server-filesystem /tmp", "type": "stdio" },
//!         { "name": "weather", "url": "https://tools.example.com/mcp", "type": "http",
//!           "auth": { "type": "bearer", "token": "${WEATHER_TOKEN}" } }
//!       ],
//!       "default_timeout_ms": 10000,
//!       "expensive_timeout_ms": 120000
//!     }

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BrokerError, Result};

/// Handshake and discovery timeout when a provider sets none
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Short tier of the invocation timeout policy
pub const DEFAULT_INVOKE_TIMEOUT_MS: u64 = 10_000;

/// Long tier of the invocation timeout policy
pub const EXPENSIVE_INVOKE_TIMEOUT_MS: u64 = 120_000;

/// Capability names matching this pattern get the long timeout
pub const DEFAULT_EXPENSIVE_PATTERN: &str = r"(?i)(comprehensive|deep[_-]?research)";

/// Transport kind named in a provider config
///
/// Any string other than the known kinds is preserved as `Other` so the
/// broker can reject it with an unsupported-transport error instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
    /// JSON-RPC over a persistent WebSocket
    WebSocket,
    Other(String),
}

impl TransportKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::WebSocket => "websocket",
            TransportKind::Other(other) => other,
        }
    }
}

impl From<String> for TransportKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "stdio" | "subprocess" => TransportKind::Stdio,
            "http" | "https" => TransportKind::Http,
            "websocket" | "ws" | "socket" => TransportKind::WebSocket,
            _ => TransportKind::Other(value),
        }
    }
}

impl From<&str> for TransportKind {
    fn from(value: &str) -> Self {
        TransportKind::from(value.to_string())
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication embedded in a provider config
///
/// The broker never mints or refreshes credentials; whatever is here must
/// already be usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// No authentication required
    None,

    /// `Authorization: Bearer <token>`
    ///
    /// Example:
    ///     { "type": "bearer", "token": "${API_TOKEN}" }
    Bearer { token: String },

    /// `Authorization: Basic <base64(user:pass)>`
    ///
    /// Example:
    ///     { "type": "basic", "username": "user", "password": "${PASSWORD}" }
    Basic { username: String, password: String },

    /// Static key sent in a header (`X-API-Key` unless overridden)
    ///
    /// Example:
    ///     { "type": "apikey", "key": "${SEARCH_KEY}", "header": "X-Search-Key" }
    ApiKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
    },
}

impl AuthConfig {
    /// Resolve secrets and render the header this auth scheme sends
    ///
    /// Returns `None` for `AuthConfig::None`.
    pub fn header(&self) -> Result<Option<(String, String)>> {
        let header = match self {
            AuthConfig::None => return Ok(None),
            AuthConfig::Bearer { token } => (
                "Authorization".to_string(),
                format!("Bearer {}", resolve_env_var(token)?),
            ),
            AuthConfig::Basic { username, password } => {
                let raw = format!("{}:{}", resolve_env_var(username)?, resolve_env_var(password)?);
                ("Authorization".to_string(), format!("Basic {}", BASE64.encode(raw)))
            }
            AuthConfig::ApiKey { key, header } => (
                header.clone().unwrap_or_else(|| "X-API-Key".to_string()),
                resolve_env_var(key)?,
            ),
        };
        Ok(Some(header))
    }
}

/// Configuration for one provider
///
/// Example:
///     {
///       "name": "weather",
///       "url": "wss://tools.example.com/socket",
///       "type": "websocket",
///       "timeout": 15000,
///       "auth": { "type": "apikey", "key": "${WEATHER_KEY}" }
///     }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name (the broker's addressing key)
    pub name: String,

    /// Endpoint URL, or the command line for `stdio` providers
    pub url: String,

    #[serde(rename = "type")]
    pub transport: TransportKind,

    /// Handshake and discovery timeout in milliseconds; never bounds `tools/call`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit arguments for `stdio` providers (overrides splitting `url`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment for `stdio` providers; values support `${VAR}`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, transport: impl Into<TransportKind>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            transport: transport.into(),
            timeout: None,
            auth: None,
            description: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Check that name, address and transport kind are present
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BrokerError::Config("Provider name cannot be empty".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(BrokerError::Config(format!("Provider '{}' has empty url", self.name)));
        }
        if self.transport.as_str().trim().is_empty() {
            return Err(BrokerError::Config(format!(
                "Provider '{}' has no transport type",
                self.name
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    /// Rendered auth header, if any
    pub fn auth_header(&self) -> Result<Option<(String, String)>> {
        match &self.auth {
            Some(auth) => auth.header(),
            None => Ok(None),
        }
    }
}

/// Top-level broker configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default = "default_invoke_timeout")]
    pub default_timeout_ms: u64,

    #[serde(default = "expensive_invoke_timeout")]
    pub expensive_timeout_ms: u64,

    #[serde(default = "default_expensive_pattern")]
    pub expensive_pattern: String,
}

// Default value helpers for serde
fn default_invoke_timeout() -> u64 { DEFAULT_INVOKE_TIMEOUT_MS }
fn expensive_invoke_timeout() -> u64 { EXPENSIVE_INVOKE_TIMEOUT_MS }
fn default_expensive_pattern() -> String { DEFAULT_EXPENSIVE_PATTERN.to_string() }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_timeout_ms: DEFAULT_INVOKE_TIMEOUT_MS,
            expensive_timeout_ms: EXPENSIVE_INVOKE_TIMEOUT_MS,
            expensive_pattern: DEFAULT_EXPENSIVE_PATTERN.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Default config location: `~/.toolbroker/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".toolbroker").join("config.json"))
    }

    /// Load configuration from a JSON file
    ///
    /// Error Conditions:
    /// - File not found: Returns Io error
    /// - Invalid JSON: Returns Json error
    /// - Validation failure: Returns Config error
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validation Rules:
    /// 1. Every provider passes `ProviderConfig::validate`
    /// 2. Provider names are unique
    /// 3. Both timeout tiers are non-zero
    /// 4. The expensive-operation pattern compiles
    ///
    /// Unsupported transport kinds are NOT rejected here; registration
    /// reports them per provider.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(BrokerError::Config(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        if self.default_timeout_ms == 0 || self.expensive_timeout_ms == 0 {
            return Err(BrokerError::Config("Timeouts must be greater than zero".to_string()));
        }

        regex::Regex::new(&self.expensive_pattern).map_err(|e| {
            BrokerError::Config(format!("Invalid expensive_pattern: {}", e))
        })?;

        Ok(())
    }

    /// Save configuration as pretty-printed JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Resolve environment variable reference
///
/// Pattern: ${VAR_NAME}
///
/// Example:
///     resolve_env_var("${API_KEY}") -> Ok("sk_12345...")
///     resolve_env_var("literal-value") -> Ok("literal-value")
pub fn resolve_env_var(value: &str) -> Result<String> {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| BrokerError::Config(format!("Environment variable not found: {}", var_name))),
        None => Ok(value.to_string()),
    }
}
