//! HTTP front for a [`MemoryStore`]
//!
//! Routes:
//! - `GET    /kv/:key`                      value bytes, 404 when absent
//! - `PUT    /kv/:key?ttl_ms=N[&nx=true]`   `{"stored": bool}`
//! - `DELETE /kv/:key`                      `{"deleted": bool}`
//! - `GET    /health`, `GET /metrics`

use super::{CoordinationStore, MemoryStore};
use crate::common::{Result, METRICS};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How often the server sweeps expired keys
const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct StoreState {
    pub store: Arc<MemoryStore>,
}

#[derive(Debug, Deserialize)]
struct PutParams {
    #[serde(default)]
    ttl_ms: u64,
    #[serde(default)]
    nx: bool,
}

pub fn create_router(state: StoreState) -> Router {
    Router::new()
        .route("/kv/:key", get(get_key).put(put_key).delete(delete_key))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn get_key(State(state): State<StoreState>, Path(key): Path<String>) -> Response {
    match state.store.get(&key).await {
        Ok(Some(value)) => (StatusCode::OK, value).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(e),
    }
}

async fn put_key(
    State(state): State<StoreState>,
    Path(key): Path<String>,
    Query(params): Query<PutParams>,
    body: Bytes,
) -> Response {
    let ttl = Duration::from_millis(params.ttl_ms);
    let result = if params.nx {
        state.store.set_nx(&key, body.to_vec(), ttl).await
    } else {
        state.store.set(&key, body.to_vec(), ttl).await.map(|_| true)
    };

    match result {
        Ok(stored) => Json(json!({ "stored": stored })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_key(State(state): State<StoreState>, Path(key): Path<String>) -> Response {
    match state.store.delete(&key).await {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(state): State<StoreState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "keys": state.store.len().await,
        "version": crate::VERSION,
    }))
}

async fn metrics() -> impl IntoResponse {
    METRICS.to_prometheus()
}

fn error_response(e: crate::Error) -> Response {
    tracing::warn!("store request failed: {}", e);
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

/// Serve the store until the listener fails
pub async fn serve(bind_addr: SocketAddr) -> Result<()> {
    let store = Arc::new(MemoryStore::new());

    let purge_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purge_store.purge_expired().await;
            if purged > 0 {
                tracing::debug!("purged {} expired keys", purged);
            }
        }
    });

    let router = create_router(StoreState { store });
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("✓ Coordination store listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            create_router(StoreState {
                store: store.clone(),
            }),
            store,
        )
    }

    #[tokio::test]
    async fn test_get_missing_key_is_404() {
        let (router, _) = router();
        let resp = router
            .oneshot(Request::get("/kv/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_nx_twice() {
        let (router, store) = router();

        let put = || {
            Request::put("/kv/ha_cluster:primary_lock?ttl_ms=30000&nx=true")
                .body(Body::from("node-a"))
                .unwrap()
        };

        let first = router.clone().oneshot(put()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body = axum::body::to_bytes(first.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"stored":true}"#);

        let second = router.oneshot(put()).await.unwrap();
        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"stored":false}"#);

        assert_eq!(
            store.get("ha_cluster:primary_lock").await.unwrap(),
            Some(b"node-a".to_vec())
        );
    }

    #[tokio::test]
    async fn test_offline_store_maps_to_bad_gateway() {
        let (router, store) = router();
        store.set_offline(true);
        let resp = router
            .oneshot(Request::get("/kv/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
