//! Two-tier invocation timeout policy
//!
//! Capabilities whose name matches the expensive pattern (comprehensive or
//! deep-research style operations) get the long timeout; everything else
//! gets the short default. A caller-supplied timeout always wins.

use regex::Regex;
use std::time::Duration;

use crate::broker::config::{
    BrokerConfig, DEFAULT_EXPENSIVE_PATTERN, DEFAULT_INVOKE_TIMEOUT_MS, EXPENSIVE_INVOKE_TIMEOUT_MS,
};
use crate::broker::schema::InvocationRequest;
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default: Duration,
    expensive: Duration,
    pattern: Regex,
}

impl TimeoutPolicy {
    pub fn new(default: Duration, expensive: Duration, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| BrokerError::Config(format!("Invalid expensive pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            default,
            expensive,
            pattern,
        })
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        Self::new(
            Duration::from_millis(config.default_timeout_ms),
            Duration::from_millis(config.expensive_timeout_ms),
            &config.expensive_pattern,
        )
    }

    pub fn is_expensive(&self, capability: &str) -> bool {
        self.pattern.is_match(capability)
    }

    /// Policy timeout for a capability name, ignoring caller overrides
    pub fn timeout_for(&self, capability: &str) -> Duration {
        if self.is_expensive(capability) {
            self.expensive
        } else {
            self.default
        }
    }

    /// Timeout the broker races the transport call against
    pub fn effective_timeout(&self, request: &InvocationRequest) -> Duration {
        request
            .timeout()
            .unwrap_or_else(|| self.timeout_for(&request.capability))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    pub fn expensive_timeout(&self) -> Duration {
        self.expensive
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(DEFAULT_INVOKE_TIMEOUT_MS),
            expensive: Duration::from_millis(EXPENSIVE_INVOKE_TIMEOUT_MS),
            pattern: Regex::new(DEFAULT_EXPENSIVE_PATTERN).expect("built-in expensive pattern compiles"),
        }
    }
}
