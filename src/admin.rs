//! Admin HTTP API of a fleet node
//!
//! Routes:
//! - `GET  /health`                       liveness plus this node's role
//! - `GET  /cluster`                      failover cluster status
//! - `GET  /services/:name`               healthy instances of a service
//! - `GET  /services/:name/select`        one instance (`?strategy=&key=`)
//! - `GET  /registry/stats`               registry counters
//! - `POST /failover`                     hand the primary role over
//! - `GET  /metrics`                      Prometheus text

use crate::balancer::{LoadBalancerPool, RequestContext};
use crate::common::METRICS;
use crate::failover::FailoverManager;
use crate::registry::ServiceRegistry;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub registry: ServiceRegistry,
    pub failover: FailoverManager,
    pub balancers: Arc<LoadBalancerPool>,
}

impl AdminState {
    pub fn new(registry: ServiceRegistry, failover: FailoverManager) -> Self {
        let balancers = Arc::new(LoadBalancerPool::new(registry.clone()));
        Self {
            registry,
            failover,
            balancers,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectParams {
    #[serde(default = "default_strategy")]
    strategy: String,
    key: Option<String>,
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct FailoverRequest {
    reason: Option<String>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cluster", get(cluster))
        .route("/services/:name", get(discover))
        .route("/services/:name/select", get(select))
        .route("/registry/stats", get(registry_stats))
        .route("/failover", post(failover))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let node = state.failover.current_node().await;
    Json(json!({
        "status": "healthy",
        "node_id": node.id,
        "role": node.role,
        "state": node.state,
        "health_score": node.health_score,
        "version": crate::VERSION,
    }))
}

async fn cluster(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.failover.cluster_status().await)
}

async fn discover(State(state): State<AdminState>, Path(name): Path<String>) -> impl IntoResponse {
    Json(state.registry.discover(&name).await)
}

async fn select(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Query(params): Query<SelectParams>,
) -> Response {
    let balancer = match state
        .balancers
        .get_load_balancer_by_name(&name, &params.strategy)
        .await
    {
        Ok(balancer) => balancer,
        Err(e) => {
            return (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
        }
    };

    let ctx = RequestContext {
        hash_key: params.key,
    };
    match balancer.select(Some(&ctx)).await {
        Some(instance) => Json(instance).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("no healthy instance of {}", name) })),
        )
            .into_response(),
    }
}

async fn registry_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.registry.stats().await)
}

async fn failover(
    State(state): State<AdminState>,
    body: Option<Json<FailoverRequest>>,
) -> Response {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "manual".to_string());

    if !state.failover.current_node().await.is_primary() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "failed_over": false, "error": "this node is not the active primary" })),
        )
            .into_response();
    }

    let failed_over = state.failover.trigger_failover(&reason).await;
    let status = if failed_over {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "failed_over": failed_over, "reason": reason }))).into_response()
}

async fn metrics() -> impl IntoResponse {
    METRICS.to_prometheus()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FailoverConfig, RegistryConfig};
    use crate::failover::{NodeIdentity, NodeRole};
    use crate::registry::{ServiceInstance, ServiceStatus};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state() -> AdminState {
        let store = Arc::new(MemoryStore::new());
        let registry = ServiceRegistry::new(store.clone(), RegistryConfig::default()).unwrap();
        let failover = FailoverManager::new(
            store,
            FailoverConfig::default(),
            NodeIdentity::new("admin-node", "127.0.0.1", 8080),
        );
        registry
            .register(
                ServiceInstance::new("api", "10.0.0.1", 8000)
                    .with_id("a")
                    .with_status(ServiceStatus::Healthy),
            )
            .await;
        AdminState::new(registry, failover)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_discover_route() {
        let router = create_router(state().await);
        let resp = router
            .oneshot(Request::get("/services/api").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body[0]["id"], "a");
    }

    #[tokio::test]
    async fn test_select_route() {
        let router = create_router(state().await);
        let ok = router
            .clone()
            .oneshot(
                Request::get("/services/api/select?strategy=least-connections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let bad = router
            .clone()
            .oneshot(
                Request::get("/services/api/select?strategy=fastest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let empty = router
            .oneshot(
                Request::get("/services/ghost/select")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_failover_route_requires_primary() {
        let state = state().await;
        state
            .failover
            .start(NodeRole::Secondary, 1)
            .await
            .unwrap();
        let router = create_router(state.clone());
        let resp = router
            .oneshot(Request::post("/failover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        state.failover.stop().await;
    }

    #[tokio::test]
    async fn test_cluster_route() {
        let state = state().await;
        let router = create_router(state);
        let resp = router
            .oneshot(Request::get("/cluster").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["cluster_id"], "fleet-cluster");
        assert_eq!(body["current_node"]["id"], "admin-node");
    }
}
