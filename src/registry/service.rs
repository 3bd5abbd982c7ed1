//! Service registry
//!
//! The store holds the authoritative instance records; the in-process map
//! is a cache that [`ServiceRegistry::refresh`] can always rebuild. Each
//! instance that declares a probe URL gets one probe task, and two
//! housekeeping loops run while the registry is started:
//!
//! - cleanup: purge instances whose heartbeat is older than the expiry,
//!   then reconcile the cache with the store
//! - supervisor: (re)start probe tasks that are missing or finished

use super::health::{apply_probe_outcome, HealthProbe, HttpProbe};
use super::instance::{HealthSnapshot, ServiceInstance, ServiceStatus};
use crate::common::{Error, RegistryConfig, Result, METRICS};
use crate::store::{keys, CoordinationStore, StoreExt};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry-wide counters returned by [`ServiceRegistry::stats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    /// Instances with a running probe task
    pub monitored_instances: usize,
    pub services: BTreeMap<String, ServiceCounts>,
    pub is_running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceCounts {
    pub total: usize,
    pub healthy: usize,
}

/// Probe tasks are keyed by (service, instance id); names are opaque
type TaskKey = (String, String);

fn task_key(service: &str, instance_id: &str) -> TaskKey {
    (service.to_string(), instance_id.to_string())
}

struct Inner {
    store: Arc<dyn CoordinationStore>,
    config: RegistryConfig,
    probe: Arc<dyn HealthProbe>,
    /// Instances per service, in registration order
    services: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    probe_tasks: Mutex<HashMap<TaskKey, JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

/// Cheaply cloneable handle to one registry
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl ServiceRegistry {
    /// Registry probing over HTTP
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistryConfig) -> Result<Self> {
        Ok(Self::with_probe(store, config, Arc::new(HttpProbe::new()?)))
    }

    pub fn with_probe(
        store: Arc<dyn CoordinationStore>,
        config: RegistryConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                probe,
                services: RwLock::new(HashMap::new()),
                probe_tasks: Mutex::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
                shutdown,
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // === Lifecycle ===

    /// Start the cleanup and supervisor loops and probe every known instance
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(false);

        let cleanup = tokio::spawn(self.clone().cleanup_loop(self.inner.shutdown.subscribe()));
        let supervisor =
            tokio::spawn(self.clone().supervisor_loop(self.inner.shutdown.subscribe()));
        self.inner
            .background
            .lock()
            .await
            .extend([cleanup, supervisor]);

        let started = self.supervise_probes().await;
        info!("Service registry started ({} probe tasks)", started);
    }

    /// Cancel every loop and probe task and wait for them to finish
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let background: Vec<_> = self.inner.background.lock().await.drain(..).collect();
        for handle in background {
            let _ = handle.await;
        }

        let probes: Vec<_> = self
            .inner
            .probe_tasks
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &probes {
            handle.abort();
        }
        for handle in probes {
            let _ = handle.await;
        }

        info!("Service registry stopped");
    }

    // === Public API ===

    /// Register (or re-register) an instance; returns false when the store
    /// could not be updated. The local cache keeps the instance either way.
    pub async fn register(&self, instance: ServiceInstance) -> bool {
        let mut instance = instance;
        if instance.status == ServiceStatus::Unknown {
            instance.status = if instance.health_check_url.is_some() {
                ServiceStatus::Starting
            } else {
                ServiceStatus::Healthy
            };
        }
        instance.last_heartbeat = Utc::now();

        let service = instance.name.clone();
        let id = instance.id.clone();

        {
            let mut services = self.inner.services.write().await;
            let list = services.entry(service.clone()).or_default();
            match list.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = instance.clone(),
                None => list.push(instance.clone()),
            }
        }
        METRICS.instances_registered.inc();

        let persisted = match self.persist_registration(&instance).await {
            Ok(()) => true,
            Err(e) => {
                METRICS.store_errors.inc();
                warn!("Failed to persist registration of {}/{}: {}", service, id, e);
                false
            }
        };

        if self.is_running() && instance.probe_url().is_some() {
            let mut tasks = self.inner.probe_tasks.lock().await;
            if let Some(previous) = tasks.remove(&task_key(&service, &id)) {
                previous.abort();
            }
            tasks.insert(task_key(&service, &id), self.spawn_probe(&service, &id));
        }

        info!(
            "Registered instance {} of {} at {} ({})",
            id,
            service,
            instance.address(),
            instance.status
        );
        persisted
    }

    /// Remove an instance from the cache and the store and cancel its probe
    pub async fn deregister(&self, service: &str, instance_id: &str) -> bool {
        let removed_local = {
            let mut services = self.inner.services.write().await;
            let removed = match services.get_mut(service) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|instance| instance.id != instance_id);
                    before != list.len()
                }
                None => false,
            };
            if services.get(service).is_some_and(|list| list.is_empty()) {
                services.remove(service);
            }
            removed
        };

        if let Some(handle) = self
            .inner
            .probe_tasks
            .lock()
            .await
            .remove(&task_key(service, instance_id))
        {
            handle.abort();
        }

        let removed_store = match self.remove_from_store(service, instance_id).await {
            Ok(removed) => removed,
            Err(e) => {
                METRICS.store_errors.inc();
                warn!(
                    "Failed to remove {}/{} from store: {}",
                    service, instance_id, e
                );
                false
            }
        };

        let removed = removed_local || removed_store;
        if removed {
            METRICS.instances_deregistered.inc();
            info!("Deregistered instance {} of {}", instance_id, service);
        }
        removed
    }

    /// Healthy instances of a service. Never fails: store errors yield an
    /// empty list.
    pub async fn discover(&self, service: &str) -> Vec<ServiceInstance> {
        {
            let services = self.inner.services.read().await;
            if let Some(list) = services.get(service).filter(|list| !list.is_empty()) {
                return list.iter().filter(|i| i.is_healthy()).cloned().collect();
            }
        }

        match self.load_from_store(service).await {
            Ok(instances) => instances.into_iter().filter(|i| i.is_healthy()).collect(),
            Err(e) => {
                METRICS.store_errors.inc();
                warn!("Discovery of {} failed, returning no instances: {}", service, e);
                Vec::new()
            }
        }
    }

    /// Refresh an instance's heartbeat; false means the record is gone and
    /// the caller should register again
    pub async fn heartbeat(&self, service: &str, instance_id: &str) -> bool {
        let now = Utc::now();

        let local = {
            let mut services = self.inner.services.write().await;
            services
                .get_mut(service)
                .and_then(|list| list.iter_mut().find(|i| i.id == instance_id))
                .map(|instance| {
                    instance.last_heartbeat = now;
                    instance.clone()
                })
        };

        let instance = match local {
            Some(instance) => instance,
            None => {
                let key = keys::service_instance(service, instance_id);
                match self.inner.store.get_json::<ServiceInstance>(&key).await {
                    Ok(Some(mut instance)) => {
                        instance.last_heartbeat = now;
                        self.inner
                            .services
                            .write()
                            .await
                            .entry(service.to_string())
                            .or_default()
                            .push(instance.clone());
                        instance
                    }
                    Ok(None) => {
                        debug!("Heartbeat for unknown instance {}/{}", service, instance_id);
                        return false;
                    }
                    Err(e) => {
                        METRICS.store_errors.inc();
                        warn!("Heartbeat lookup for {}/{} failed: {}", service, instance_id, e);
                        return false;
                    }
                }
            }
        };

        if let Err(e) = self.persist_registration(&instance).await {
            METRICS.store_errors.inc();
            warn!("Failed to persist heartbeat of {}/{}: {}", service, instance_id, e);
        }
        true
    }

    /// All cached instances of a service, healthy or not
    pub async fn instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.inner
            .services
            .read()
            .await
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_instance(&self, service: &str, instance_id: &str) -> Option<ServiceInstance> {
        self.inner
            .services
            .read()
            .await
            .get(service)
            .and_then(|list| list.iter().find(|i| i.id == instance_id).cloned())
    }

    /// Advisory request bookkeeping; false when the instance is not cached
    pub async fn record_request(
        &self,
        service: &str,
        instance_id: &str,
        success: bool,
        latency: Duration,
    ) -> bool {
        self.update_instance(service, instance_id, |instance| {
            instance.total_requests += 1;
            if success {
                instance.record_response_time(latency);
            } else {
                instance.consecutive_failures = instance.consecutive_failures.saturating_add(1);
            }
        })
        .await
    }

    /// Add `delta` to an instance's active connection count (floored at 0)
    pub async fn adjust_connections(&self, service: &str, instance_id: &str, delta: i64) -> bool {
        self.update_instance(service, instance_id, |instance| {
            let next = (instance.active_connections as i64 + delta).max(0);
            instance.active_connections = next.min(u32::MAX as i64) as u32;
        })
        .await
    }

    pub async fn stats(&self) -> RegistryStats {
        let monitored = self
            .inner
            .probe_tasks
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count();

        let services = self.inner.services.read().await;
        let mut stats = RegistryStats {
            total_services: services.len(),
            monitored_instances: monitored,
            is_running: self.is_running(),
            ..Default::default()
        };

        for (name, list) in services.iter() {
            let healthy = list.iter().filter(|i| i.is_healthy()).count();
            let unhealthy = list
                .iter()
                .filter(|i| i.status == ServiceStatus::Unhealthy)
                .count();
            stats.total_instances += list.len();
            stats.healthy_instances += healthy;
            stats.unhealthy_instances += unhealthy;
            stats.services.insert(
                name.clone(),
                ServiceCounts {
                    total: list.len(),
                    healthy,
                },
            );
        }
        stats
    }

    // === Maintenance passes ===

    /// Probe one instance once and record the outcome.
    ///
    /// Returns the updated instance, or `None` when it is no longer cached
    /// or declares no probe. Store failures are returned after the local
    /// state has been updated.
    pub async fn check_instance(
        &self,
        service: &str,
        instance_id: &str,
    ) -> Result<Option<ServiceInstance>> {
        let Some(snapshot) = self.get_instance(service, instance_id).await else {
            return Ok(None);
        };
        let Some(url) = snapshot.probe_url() else {
            return Ok(None);
        };

        let outcome = self
            .inner
            .probe
            .probe(&url, snapshot.health_check_timeout())
            .await;
        METRICS.record_probe(outcome.latency, outcome.success);

        let threshold = self.inner.config.unhealthy_threshold;
        let updated = {
            let mut services = self.inner.services.write().await;
            let Some(instance) = services
                .get_mut(service)
                .and_then(|list| list.iter_mut().find(|i| i.id == instance_id))
            else {
                return Ok(None);
            };
            let before = instance.status;
            if apply_probe_outcome(instance, &outcome, threshold, Utc::now()) {
                match instance.status {
                    ServiceStatus::Unhealthy => warn!(
                        "Instance {}/{} marked unhealthy after {} failed probes ({})",
                        service,
                        instance_id,
                        instance.consecutive_failures,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ),
                    status => info!(
                        "Instance {}/{} is now {} (was {})",
                        service, instance_id, status, before
                    ),
                }
            }
            instance.clone()
        };

        let store = &self.inner.store;
        store
            .set_json(
                &keys::service_instance(service, instance_id),
                &updated,
                self.inner.config.instance_ttl(),
            )
            .await?;
        store
            .set_json(
                &keys::service_health(service, instance_id),
                &HealthSnapshot::of(&updated, outcome.error),
                self.inner.config.health_snapshot_ttl(),
            )
            .await?;

        Ok(Some(updated))
    }

    /// Deregister every instance whose heartbeat is older than the expiry.
    /// Returns the removed `(service, instance_id)` pairs.
    pub async fn cleanup_expired(&self) -> Vec<(String, String)> {
        let now = Utc::now();
        let expiry = self.inner.config.heartbeat_expiry();

        let stale: Vec<(String, String)> = {
            let services = self.inner.services.read().await;
            services
                .iter()
                .flat_map(|(service, list)| {
                    list.iter()
                        .filter(|i| i.heartbeat_age(now) > expiry)
                        .map(|i| (service.clone(), i.id.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        for (service, id) in &stale {
            info!("Instance {}/{} missed heartbeats, removing", service, id);
            self.deregister(service, id).await;
            METRICS.instances_expired.inc();
        }
        stale
    }

    /// Start probe tasks for cached instances that declare a probe but have
    /// no live task; drop tasks of instances that left the cache.
    pub async fn supervise_probes(&self) -> usize {
        let wanted: HashSet<TaskKey> = {
            let services = self.inner.services.read().await;
            services
                .values()
                .flatten()
                .filter(|i| i.probe_url().is_some())
                .map(|i| task_key(&i.name, &i.id))
                .collect()
        };

        let mut tasks = self.inner.probe_tasks.lock().await;
        tasks.retain(|key, handle| {
            let keep = wanted.contains(key);
            if !keep {
                handle.abort();
            }
            keep
        });

        let mut started = 0;
        for key in wanted {
            let alive = tasks.get(&key).is_some_and(|handle| !handle.is_finished());
            if alive {
                continue;
            }
            let (service, id) = &key;
            debug!("Starting probe task for {}/{}", service, id);
            let handle = self.spawn_probe(service, id);
            tasks.insert(key, handle);
            started += 1;
        }
        started
    }

    /// Rebuild one service's cache entries from the store (store wins).
    ///
    /// Local request stats (counters, latency average, request failures)
    /// survive for instances present in both tiers.
    /// Probe tasks of instances that disappeared are cancelled.
    pub async fn refresh(&self, service: &str) -> Result<usize> {
        let mut records = self.load_from_store(service).await?;
        let count = records.len();

        let dropped: Vec<String> = {
            let mut services = self.inner.services.write().await;
            let previous = services.remove(service).unwrap_or_default();

            for record in records.iter_mut() {
                if let Some(local) = previous.iter().find(|i| i.id == record.id) {
                    record.total_requests = local.total_requests;
                    record.active_connections = local.active_connections;
                    record.response_time_avg = local.response_time_avg;
                    // probes persist their streak, requests only add to it locally
                    record.consecutive_failures =
                        record.consecutive_failures.max(local.consecutive_failures);
                }
            }

            let kept: HashSet<&str> = records.iter().map(|i| i.id.as_str()).collect();
            let dropped = previous
                .iter()
                .filter(|i| !kept.contains(i.id.as_str()))
                .map(|i| i.id.clone())
                .collect();

            if !records.is_empty() {
                services.insert(service.to_string(), records);
            }
            dropped
        };

        if !dropped.is_empty() {
            let mut tasks = self.inner.probe_tasks.lock().await;
            for id in &dropped {
                if let Some(handle) = tasks.remove(&task_key(service, id)) {
                    handle.abort();
                }
            }
            debug!("Refresh of {} dropped {} stale cache entries", service, dropped.len());
        }

        Ok(count)
    }

    /// [`refresh`](Self::refresh) every locally known service
    pub async fn refresh_all(&self) {
        let names: Vec<String> = self.inner.services.read().await.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.refresh(&name).await {
                METRICS.store_errors.inc();
                warn!("Refresh of {} failed, keeping cached view: {}", name, e);
            }
        }
    }

    // === Internals ===

    async fn update_instance<F>(&self, service: &str, instance_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ServiceInstance),
    {
        let mut services = self.inner.services.write().await;
        match services
            .get_mut(service)
            .and_then(|list| list.iter_mut().find(|i| i.id == instance_id))
        {
            Some(instance) => {
                f(instance);
                true
            }
            None => false,
        }
    }

    async fn persist_registration(&self, instance: &ServiceInstance) -> Result<()> {
        let ttl = self.inner.config.instance_ttl();
        let store = &self.inner.store;

        store
            .set_json(&keys::service_instance(&instance.name, &instance.id), instance, ttl)
            .await?;

        let list_key = keys::service_registry(&instance.name);
        let mut ids: Vec<String> = store.get_json(&list_key).await?.unwrap_or_default();
        if !ids.contains(&instance.id) {
            ids.push(instance.id.clone());
        }
        store.set_json(&list_key, &ids, ttl).await
    }

    async fn remove_from_store(&self, service: &str, instance_id: &str) -> Result<bool> {
        let store = &self.inner.store;
        let removed = store
            .delete(&keys::service_instance(service, instance_id))
            .await?;
        store
            .delete(&keys::service_health(service, instance_id))
            .await?;

        let list_key = keys::service_registry(service);
        if let Some(mut ids) = store.get_json::<Vec<String>>(&list_key).await? {
            ids.retain(|id| id != instance_id);
            if ids.is_empty() {
                store.delete(&list_key).await?;
            } else {
                store
                    .set_json(&list_key, &ids, self.inner.config.instance_ttl())
                    .await?;
            }
        }
        Ok(removed)
    }

    async fn load_from_store(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        let store = &self.inner.store;
        let ids: Vec<String> = store
            .get_json(&keys::service_registry(service))
            .await?
            .unwrap_or_default();

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            match store
                .get_json::<ServiceInstance>(&keys::service_instance(service, &id))
                .await
            {
                Ok(Some(instance)) => instances.push(instance),
                Ok(None) => debug!("Instance {}/{} listed but expired", service, id),
                Err(Error::Serialization(e)) => {
                    warn!("Skipping corrupt record {}/{}: {}", service, id, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(instances)
    }

    fn spawn_probe(&self, service: &str, instance_id: &str) -> JoinHandle<()> {
        tokio::spawn(
            self.clone()
                .probe_loop(service.to_string(), instance_id.to_string()),
        )
    }

    async fn probe_loop(self, service: String, instance_id: String) {
        loop {
            let delay = match self.check_instance(&service, &instance_id).await {
                Ok(Some(instance)) => instance.health_check_interval(),
                Ok(None) => {
                    debug!("Probe task for {}/{} exiting", service, instance_id);
                    break;
                }
                Err(e) => {
                    METRICS.store_errors.inc();
                    warn!(
                        "Health check of {}/{} failed: {}, backing off",
                        service, instance_id, e
                    );
                    self.inner.config.error_backoff()
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    async fn cleanup_loop(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.cleanup_interval();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let removed = self.cleanup_expired().await;
            if !removed.is_empty() {
                info!("Cleanup removed {} expired instances", removed.len());
            }
            self.refresh_all().await;
        }
    }

    async fn supervisor_loop(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.supervisor_interval();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let started = self.supervise_probes().await;
            if started > 0 {
                info!("Supervisor restarted {} probe tasks", started);
            }
        }
    }
}
