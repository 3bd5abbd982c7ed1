//! Service registry integration tests

use axum::{extract::State, http::StatusCode, routing::get, Router};
use fleetcoord::common::RegistryConfig;
use fleetcoord::registry::{HealthSnapshot, ServiceInstance, ServiceRegistry, ServiceStatus};
use fleetcoord::store::{keys, MemoryStore, StoreExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Spawn a `/health` endpoint whose answer follows `up`
async fn spawn_health_endpoint(up: Arc<AtomicBool>) -> SocketAddr {
    async fn health(State(up): State<Arc<AtomicBool>>) -> StatusCode {
        if up.load(Ordering::SeqCst) {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    let router = Router::new().route("/health", get(health)).with_state(up);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn registry(store: &Arc<MemoryStore>) -> ServiceRegistry {
    ServiceRegistry::new(store.clone(), RegistryConfig::default()).unwrap()
}

#[tokio::test]
async fn test_health_demotion_over_http() {
    let up = Arc::new(AtomicBool::new(true));
    let addr = spawn_health_endpoint(up.clone()).await;

    let store = Arc::new(MemoryStore::new());
    let registry = registry(&store);
    registry
        .register(
            ServiceInstance::new("auth", addr.ip().to_string(), addr.port())
                .with_id("auth-1")
                .with_health_check("/health", Duration::from_secs(5), Duration::from_secs(1)),
        )
        .await;

    // declared probe: not routable until the first successful check
    assert!(registry.discover("auth").await.is_empty());
    registry.check_instance("auth", "auth-1").await.unwrap();
    assert_eq!(registry.discover("auth").await.len(), 1);

    up.store(false, Ordering::SeqCst);
    for round in 1..=3 {
        let instance = registry
            .check_instance("auth", "auth-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.consecutive_failures, round);
    }
    assert!(registry.discover("auth").await.is_empty());

    // idempotent while failing
    registry.check_instance("auth", "auth-1").await.unwrap();
    assert!(registry.discover("auth").await.is_empty());

    up.store(true, Ordering::SeqCst);
    registry.check_instance("auth", "auth-1").await.unwrap();
    let healthy = registry.discover("auth").await;
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].consecutive_failures, 0);

    let snapshot: HealthSnapshot = store
        .get_json(&keys::service_health("auth", "auth-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.status, ServiceStatus::Healthy);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_probe_loop_runs_while_started() {
    let up = Arc::new(AtomicBool::new(true));
    let addr = spawn_health_endpoint(up).await;

    let store = Arc::new(MemoryStore::new());
    let registry = registry(&store);
    registry.start().await;
    registry
        .register(
            ServiceInstance::new("auth", addr.ip().to_string(), addr.port())
                .with_id("auth-1")
                .with_health_check("/health", Duration::from_secs(5), Duration::from_secs(1)),
        )
        .await;

    let mut healthy = Vec::new();
    for _ in 0..50 {
        healthy = registry.discover("auth").await;
        if !healthy.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(healthy.len(), 1);

    registry.stop().await;
    assert_eq!(registry.stats().await.monitored_instances, 0);
}

#[tokio::test]
async fn test_ttl_sweep_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry(&store);
    registry
        .register(ServiceInstance::new("billing", "10.0.0.5", 9000).with_id("b-1"))
        .await;

    // another node adopted the record and last heard of it 301s ago
    let mut stale: ServiceInstance = store
        .get_json(&keys::service_instance("billing", "b-1"))
        .await
        .unwrap()
        .unwrap();
    stale.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(301);
    store
        .set_json(
            &keys::service_instance("billing", "b-1"),
            &stale,
            Duration::from_secs(300),
        )
        .await
        .unwrap();
    registry.refresh("billing").await.unwrap();

    let removed = registry.cleanup_expired().await;
    assert_eq!(removed.len(), 1);
    assert!(registry.discover("billing").await.is_empty());
    assert!(registry.cleanup_expired().await.is_empty());
}

#[tokio::test]
async fn test_discover_fails_open_when_store_down() {
    let store = Arc::new(MemoryStore::new());
    let writer = registry(&store);
    writer
        .register(ServiceInstance::new("auth", "10.0.0.1", 8000).with_id("a"))
        .await;

    let reader = registry(&store);
    assert_eq!(reader.discover("auth").await.len(), 1);

    store.set_offline(true);
    let cold = registry(&store);
    assert!(cold.discover("auth").await.is_empty());
    // the warm cache keeps answering
    assert_eq!(writer.discover("auth").await.len(), 1);
    assert!(!writer.heartbeat("auth", "missing").await);
}

#[tokio::test(start_paused = true)]
async fn test_store_records_expire_without_heartbeats() {
    let store = Arc::new(MemoryStore::new());
    let writer = registry(&store);
    writer
        .register(ServiceInstance::new("auth", "10.0.0.1", 8000).with_id("a"))
        .await;

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(writer.heartbeat("auth", "a").await);

    // past the first registration's TTL, alive thanks to the heartbeat
    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(registry(&store).discover("auth").await.len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(registry(&store).discover("auth").await.is_empty());
}
