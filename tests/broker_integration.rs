//! Broker integration tests
//!
//! Drives the public broker API end to end with an in-process fake
//! transport whose latency is controlled per test:
//! 1. Registration makes discovered capabilities invokable
//! 2. Unsupported transports fail before any connect
//! 3. Timeouts (policy and caller override) end records as timed_out
//! 4. Concurrent invocations keep distinct, correctly attributed records
//! 5. Teardown leaves every provider disconnected with an empty catalog

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use toolbroker::broker::{
    AdapterTable, Arguments, Broker, Capability, ExecutionStatus, InvocationRequest, InvocationResult,
    ParameterSchema, ProviderConfig, ProviderStatus, TimeoutPolicy, TransportAdapter, TransportKind,
};
use toolbroker::{BrokerError, ErrorKind, Result};

/// Transport that answers after a fixed delay
struct FakeAdapter {
    tools: Vec<Capability>,
    delay: Duration,
    connected: AtomicBool,
}

impl FakeAdapter {
    fn new(delay: Duration) -> Self {
        Self {
            tools: vec![
                Capability::new("search", "Search the web").with_parameters(
                    ParameterSchema::object().property("query", ParameterSchema::string(), true),
                ),
                Capability::new("deep_research", "Multi-step research report"),
            ],
            delay,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TransportAdapter for FakeAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self, _config: &ProviderConfig) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn discover_capabilities(&self) -> Result<Vec<Capability>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        Ok(self.tools.clone())
    }

    async fn invoke(&self, capability: &str, arguments: &Arguments) -> Result<InvocationResult> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        Ok(InvocationResult::success(
            json!({ "capability": capability, "echo": arguments }),
            started.elapsed(),
        ))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn broker_with_delay(delay: Duration) -> Broker {
    Broker::builder()
        .adapter_table(AdapterTable::empty())
        .adapter(
            TransportKind::Http,
            Arc::new(move || Arc::new(FakeAdapter::new(delay)) as Arc<dyn TransportAdapter>),
        )
        .build()
        .unwrap()
}

fn http(name: &str) -> ProviderConfig {
    ProviderConfig::new(name, format!("http://{}.test/mcp", name), TransportKind::Http)
}

#[tokio::test]
async fn test_registered_capabilities_are_invokable() {
    let broker = broker_with_delay(Duration::ZERO);
    let registered = broker.register_provider(http("web")).await.unwrap();

    for capability in &registered.capabilities {
        let request = InvocationRequest::new("web", &capability.name);
        let result = broker.invoke(request).await.unwrap();
        assert!(result.success, "{} should resolve", capability.name);
    }
}

#[tokio::test]
async fn test_unsupported_transport_fails_before_connect() {
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let calls = factory_calls.clone();
    let broker = Broker::builder()
        .adapter_table(AdapterTable::empty())
        .adapter(
            TransportKind::Http,
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Arc::new(FakeAdapter::new(Duration::ZERO)) as Arc<dyn TransportAdapter>
            }),
        )
        .build()
        .unwrap();

    let config: ProviderConfig = serde_json::from_value(json!({
        "name": "pigeon",
        "url": "coop://roof",
        "type": "carrier-pigeon"
    }))
    .unwrap();

    let err = broker.register_provider(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedTransport);
    assert!(err.to_string().contains("carrier-pigeon"));
    assert_eq!(factory_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_caller_timeout_override() {
    let broker = broker_with_delay(Duration::from_millis(500));
    broker.register_provider(http("slow")).await.unwrap();

    let request = InvocationRequest::new("slow", "search").with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = broker.invoke(request).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(400));
    match &err {
        BrokerError::Timeout {
            provider,
            capability,
            timeout,
        } => {
            assert_eq!(provider, "slow");
            assert_eq!(capability, "search");
            assert_eq!(*timeout, Duration::from_millis(50));
        }
        other => panic!("Expected timeout, got {:?}", other),
    }
    assert!(err.to_string().contains("50ms"));

    let record = broker.execution_history(Some(1)).await.remove(0);
    assert_eq!(record.status, ExecutionStatus::TimedOut);

    // The abandoned call finishes later; its completion must not land
    tokio::time::sleep(Duration::from_millis(600)).await;
    let record = broker.execution(record.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::TimedOut);
    assert!(record.result.is_none());
}

#[tokio::test]
async fn test_expensive_capabilities_get_long_timeout() {
    let broker = Broker::builder()
        .adapter_table(AdapterTable::empty())
        .adapter(
            TransportKind::Http,
            Arc::new(|| Arc::new(FakeAdapter::new(Duration::from_millis(150))) as Arc<dyn TransportAdapter>),
        )
        .policy(
            TimeoutPolicy::new(
                Duration::from_millis(50),
                Duration::from_millis(2_000),
                r"(?i)(comprehensive|deep[_-]?research)",
            )
            .unwrap(),
        )
        .build()
        .unwrap();
    broker.register_provider(http("research")).await.unwrap();

    let result = broker
        .invoke(InvocationRequest::new("research", "deep_research"))
        .await
        .unwrap();
    assert!(result.success);

    let err = broker
        .invoke(InvocationRequest::new("research", "search"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("50ms"));

    assert_eq!(
        broker.policy().effective_timeout(&InvocationRequest::new("research", "deep_research")),
        Duration::from_millis(2_000)
    );
}

#[tokio::test]
async fn test_concurrent_invocations_on_two_providers() {
    let broker = broker_with_delay(Duration::from_millis(30));
    broker.register_provider(http("alpha")).await.unwrap();
    broker.register_provider(http("beta")).await.unwrap();

    let (a, b) = tokio::join!(
        broker.invoke(InvocationRequest::new("alpha", "search").with_argument("query", json!("a"))),
        broker.invoke(InvocationRequest::new("beta", "deep_research"))
    );
    assert_eq!(a.unwrap().data.unwrap()["capability"], "search");
    assert_eq!(b.unwrap().data.unwrap()["capability"], "deep_research");

    let history = broker.execution_history(None).await;
    assert_eq!(history.len(), 2);
    assert_ne!(history[0].id, history[1].id);

    let alpha = history.iter().find(|r| r.provider == "alpha").unwrap();
    let beta = history.iter().find(|r| r.provider == "beta").unwrap();
    assert_eq!(alpha.capability, "search");
    assert_eq!(alpha.arguments["query"], "a");
    assert_eq!(beta.capability, "deep_research");
    assert!(history.iter().all(|r| r.status == ExecutionStatus::Completed));
    assert!(history.iter().all(|r| r.finished_at.is_some()));
}

#[tokio::test]
async fn test_discovery_is_idempotent() {
    let broker = broker_with_delay(Duration::ZERO);
    broker.register_provider(http("web")).await.unwrap();

    let first = broker.discover_capabilities("web").await.unwrap();
    let second = broker.discover_capabilities("web").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(broker.capabilities("web").await, second);
}

#[tokio::test]
async fn test_disconnect_all() {
    let broker = broker_with_delay(Duration::ZERO);
    for name in ["one", "two", "three"] {
        broker.register_provider(http(name)).await.unwrap();
    }
    assert_eq!(broker.get_all_tools().await.len(), 6);

    broker.disconnect_all().await;

    let providers = broker.providers().await;
    assert_eq!(providers.len(), 3);
    for provider in providers {
        assert_eq!(provider.status, ProviderStatus::Disconnected);
        assert!(broker.capabilities(&provider.name).await.is_empty());
    }

    let err = broker
        .invoke(InvocationRequest::new("one", "search"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderNotConnected);
}

#[tokio::test]
async fn test_failed_invocation_leaves_broker_usable() {
    let broker = broker_with_delay(Duration::from_millis(100));
    broker.register_provider(http("web")).await.unwrap();

    let request = InvocationRequest::new("web", "search").with_timeout(Duration::from_millis(10));
    assert!(broker.invoke(request).await.is_err());

    let result = broker
        .invoke(InvocationRequest::new("web", "search").with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(broker.provider("web").await.unwrap().status, ProviderStatus::Connected);
}
