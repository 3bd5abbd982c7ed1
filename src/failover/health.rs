//! Node health scoring
//!
//! A node starts every heartbeat at 100 and loses points for each degraded
//! dependency:
//!
//! | input    | condition            | penalty |
//! |----------|----------------------|---------|
//! | database | check errored        | 40      |
//! | database | reported unhealthy   | 30      |
//! | database | healthy, > 1000 ms   | 10      |
//! | database | healthy, > 500 ms    | 5       |
//! | cache    | errored or unhealthy | 20      |

use crate::common::{duration_ms, Result};
use crate::store::CoordinationStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Result of one dependency check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub response_time_ms: f64,
}

impl ComponentHealth {
    pub fn healthy(response_time_ms: f64) -> Self {
        Self {
            healthy: true,
            response_time_ms,
        }
    }

    pub fn unhealthy(response_time_ms: f64) -> Self {
        Self {
            healthy: false,
            response_time_ms,
        }
    }
}

/// A dependency the node's health score depends on
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<ComponentHealth>;
}

/// Pings the coordination store and times the round trip
pub struct StoreHealthCheck {
    store: Arc<dyn CoordinationStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    async fn check(&self) -> Result<ComponentHealth> {
        let start = Instant::now();
        self.store.ping().await?;
        Ok(ComponentHealth::healthy(duration_ms(start.elapsed())))
    }
}

/// Checks feeding the score; an absent input costs nothing
#[derive(Clone, Default)]
pub struct HealthInputs {
    pub database: Option<Arc<dyn HealthCheck>>,
    pub cache: Option<Arc<dyn HealthCheck>>,
}

impl HealthInputs {
    /// Cache input only, backed by the coordination store
    pub fn store_only(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            database: None,
            cache: Some(Arc::new(StoreHealthCheck::new(store))),
        }
    }

    pub fn with_database(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.database = Some(check);
        self
    }

    pub fn with_cache(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.cache = Some(check);
        self
    }

    /// Run every configured check and fold the results into a score
    pub async fn score(&self) -> f64 {
        let database = match &self.database {
            Some(check) => Some(check.check().await),
            None => None,
        };
        let cache = match &self.cache {
            Some(check) => Some(check.check().await),
            None => None,
        };
        compute_health_score(database, cache)
    }
}

/// Health score in `[0, 100]` from the outcome of each input
pub fn compute_health_score(
    database: Option<Result<ComponentHealth>>,
    cache: Option<Result<ComponentHealth>>,
) -> f64 {
    let mut score = 100.0;

    match database {
        Some(Ok(health)) if !health.healthy => score -= 30.0,
        Some(Ok(health)) if health.response_time_ms > 1000.0 => score -= 10.0,
        Some(Ok(health)) if health.response_time_ms > 500.0 => score -= 5.0,
        Some(Ok(_)) | None => {}
        Some(Err(e)) => {
            tracing::warn!("Database health check failed: {}", e);
            score -= 40.0;
        }
    }

    match cache {
        Some(Ok(health)) if !health.healthy => score -= 20.0,
        Some(Ok(_)) | None => {}
        Some(Err(e)) => {
            tracing::warn!("Cache health check failed: {}", e);
            score -= 20.0;
        }
    }

    f64::clamp(score, 0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::store::MemoryStore;

    fn err() -> Result<ComponentHealth> {
        Err(Error::Timeout("db".into()))
    }

    #[test]
    fn test_no_inputs_is_perfect() {
        assert_eq!(compute_health_score(None, None), 100.0);
    }

    #[test]
    fn test_database_penalties() {
        let score = |db| compute_health_score(Some(db), None);
        assert_eq!(score(Ok(ComponentHealth::healthy(20.0))), 100.0);
        assert_eq!(score(Ok(ComponentHealth::healthy(750.0))), 95.0);
        assert_eq!(score(Ok(ComponentHealth::healthy(1500.0))), 90.0);
        // an unhealthy report ignores latency
        assert_eq!(score(Ok(ComponentHealth::unhealthy(1500.0))), 70.0);
        assert_eq!(score(err()), 60.0);
    }

    #[test]
    fn test_cache_penalties_stack() {
        assert_eq!(
            compute_health_score(Some(err()), Some(Ok(ComponentHealth::unhealthy(1.0)))),
            40.0
        );
        assert_eq!(
            compute_health_score(Some(Ok(ComponentHealth::unhealthy(0.0))), Some(err())),
            50.0
        );
    }

    #[tokio::test]
    async fn test_store_health_input() {
        let store = Arc::new(MemoryStore::new());
        let inputs = HealthInputs::store_only(store.clone());
        assert_eq!(inputs.score().await, 100.0);

        store.set_offline(true);
        assert_eq!(inputs.score().await, 80.0);
    }
}
