//! Load balancing over the registry's healthy view
//!
//! A [`LoadBalancer`] is bound to one `(service, strategy)` pair and owns
//! nothing but its rotation counter. [`LoadBalancerPool`] hands out one
//! shared balancer per pair.

pub mod strategy;

pub use strategy::{select_from, RequestContext, Strategy};

use crate::common::{Result, METRICS};
use crate::registry::{ServiceInstance, ServiceRegistry};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub struct LoadBalancer {
    service: String,
    strategy: Strategy,
    registry: ServiceRegistry,
    counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(service: impl Into<String>, strategy: Strategy, registry: ServiceRegistry) -> Self {
        Self {
            service: service.into(),
            strategy,
            registry,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a healthy instance, or `None` when the service has none
    pub async fn select(&self, ctx: Option<&RequestContext>) -> Option<ServiceInstance> {
        let instances = self.registry.discover(&self.service).await;
        let picked = select_from(&instances, self.strategy, &self.counter, ctx);

        match &picked {
            Some(instance) => {
                METRICS.selections.inc();
                debug!(
                    "{} picked {} for {} ({} candidates)",
                    self.strategy,
                    instance.id,
                    self.service,
                    instances.len()
                );
            }
            None => {
                METRICS.empty_selections.inc();
                debug!("No healthy instance of {}", self.service);
            }
        }
        picked
    }

    /// Advisory bookkeeping after a request to `instance` completes
    pub async fn record_request(&self, instance: &ServiceInstance, success: bool, latency: Duration) {
        self.registry
            .record_request(&instance.name, &instance.id, success, latency)
            .await;
    }

    pub async fn connection_opened(&self, instance: &ServiceInstance) {
        self.registry
            .adjust_connections(&instance.name, &instance.id, 1)
            .await;
    }

    pub async fn connection_closed(&self, instance: &ServiceInstance) {
        self.registry
            .adjust_connections(&instance.name, &instance.id, -1)
            .await;
    }
}

/// One balancer per `(service, strategy)`, created on first use
pub struct LoadBalancerPool {
    registry: ServiceRegistry,
    balancers: Mutex<HashMap<(String, Strategy), Arc<LoadBalancer>>>,
}

impl LoadBalancerPool {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            balancers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_load_balancer(&self, service: &str, strategy: Strategy) -> Arc<LoadBalancer> {
        let mut balancers = self.balancers.lock().await;
        balancers
            .entry((service.to_string(), strategy))
            .or_insert_with(|| {
                Arc::new(LoadBalancer::new(service, strategy, self.registry.clone()))
            })
            .clone()
    }

    /// Like [`get_load_balancer`](Self::get_load_balancer) with a strategy
    /// name; unknown names are a configuration error
    pub async fn get_load_balancer_by_name(
        &self,
        service: &str,
        strategy: &str,
    ) -> Result<Arc<LoadBalancer>> {
        let strategy: Strategy = strategy.parse()?;
        Ok(self.get_load_balancer(service, strategy).await)
    }

    pub async fn len(&self) -> usize {
        self.balancers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.balancers.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, RegistryConfig};
    use crate::registry::ServiceStatus;
    use crate::store::MemoryStore;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(MemoryStore::new()), RegistryConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_pool_caches_per_pair() {
        let pool = LoadBalancerPool::new(registry());
        let a = pool.get_load_balancer("api", Strategy::RoundRobin).await;
        let b = pool.get_load_balancer("api", Strategy::RoundRobin).await;
        let c = pool.get_load_balancer("api", Strategy::Random).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_pool_rejects_unknown_strategy() {
        let pool = LoadBalancerPool::new(registry());
        assert!(matches!(
            pool.get_load_balancer_by_name("api", "fastest").await,
            Err(Error::UnknownStrategy(_))
        ));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_select_without_instances() {
        let lb = LoadBalancer::new("ghost", Strategy::RoundRobin, registry());
        assert!(lb.select(None).await.is_none());
    }

    #[tokio::test]
    async fn test_connection_tracking_steers_least_connections() {
        let registry = registry();
        for id in ["a", "b"] {
            registry
                .register(
                    ServiceInstance::new("api", "10.0.0.1", 8000)
                        .with_id(id)
                        .with_status(ServiceStatus::Healthy),
                )
                .await;
        }
        let lb = LoadBalancer::new("api", Strategy::LeastConnections, registry.clone());

        let first = lb.select(None).await.unwrap();
        assert_eq!(first.id, "a");
        lb.connection_opened(&first).await;
        assert_eq!(lb.select(None).await.unwrap().id, "b");

        lb.connection_closed(&first).await;
        assert_eq!(lb.select(None).await.unwrap().id, "a");
    }
}
