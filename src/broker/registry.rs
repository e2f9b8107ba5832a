//! Provider Registry
//!
//! Design Decision: Pure bookkeeping, no transport access
//!
//! The registry records which providers are configured and what state their
//! connection is in. It never connects, discovers or invokes; the broker
//! drives every transition and is the only writer.
//!
//! State Transitions:
//! - register → Disconnected
//! - Disconnected → Connected (handshake ok) | Error (handshake failed)
//! - Connected → Disconnected (teardown) | Error
//! - any → removed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::broker::config::{ProviderConfig, TransportKind};

/// Connection state of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Connected,
    Disconnected,
    Error,
}

/// One registered provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub url: String,
    pub transport: TransportKind,
    pub status: ProviderStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Config the provider was registered with (may hold credentials)
    #[serde(skip)]
    pub config: Option<ProviderConfig>,
}

impl ProviderEntry {
    fn from_config(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            transport: config.transport.clone(),
            status: ProviderStatus::Disconnected,
            last_connected: None,
            last_error: None,
            config: Some(config.clone()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ProviderStatus::Connected
    }
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a provider in `Disconnected` state, replacing any entry with the same name
    pub fn register(&mut self, config: &ProviderConfig) -> &ProviderEntry {
        self.providers
            .insert(config.name.clone(), ProviderEntry::from_config(config));
        &self.providers[&config.name]
    }

    /// Returns false if the provider is unknown
    pub fn mark_connected(&mut self, name: &str) -> bool {
        let Some(entry) = self.providers.get_mut(name) else {
            return false;
        };
        entry.status = ProviderStatus::Connected;
        entry.last_connected = Some(Utc::now());
        entry.last_error = None;
        true
    }

    pub fn mark_error(&mut self, name: &str, message: impl Into<String>) -> bool {
        let Some(entry) = self.providers.get_mut(name) else {
            return false;
        };
        entry.status = ProviderStatus::Error;
        entry.last_error = Some(message.into());
        true
    }

    pub fn mark_disconnected(&mut self, name: &str) -> bool {
        let Some(entry) = self.providers.get_mut(name) else {
            return false;
        };
        entry.status = ProviderStatus::Disconnected;
        true
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    /// All providers, sorted by name
    pub fn all(&self) -> Vec<ProviderEntry> {
        let mut entries: Vec<_> = self.providers.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove(&mut self, name: &str) -> Option<ProviderEntry> {
        self.providers.remove(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
