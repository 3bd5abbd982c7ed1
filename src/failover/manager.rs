//! Failover manager
//!
//! Each process owns one [`FailoverManager`]. It publishes the local node
//! record, keeps a view of the cluster built from the store, and runs
//! elections when no healthy primary is visible. Nodes never call each
//! other: a node promoted by someone else learns about it from the
//! `ha_promotion:{id}` hand-off on its next heartbeat or refresh.

use super::election::{best_secondary, eligible_candidates};
use super::health::HealthInputs;
use super::node::{
    ElectionLock, EventType, FailoverEvent, FailoverNode, FailoverSignal, FailoverState,
    NodeIdentity, NodeRole, PrimaryLock, PromotionNotice,
};
use crate::common::{generate_id, Error, FailoverConfig, Result, METRICS};
use crate::store::{keys, CoordinationStore, StoreExt};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Async hook run on every role change of the local node
pub type FailoverCallback =
    Arc<dyn Fn(FailoverSignal) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// One node as shown in [`ClusterStatus`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub address: String,
    pub role: NodeRole,
    pub state: FailoverState,
    pub priority: i32,
    pub health_score: f64,
    pub is_healthy: bool,
    pub failure_count: u32,
    pub recovery_count: u32,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeSummary {
    fn of(node: &FailoverNode, is_healthy: bool) -> Self {
        Self {
            id: node.id.clone(),
            address: node.address(),
            role: node.role,
            state: node.state,
            priority: node.priority,
            health_score: node.health_score,
            is_healthy,
            failure_count: node.failure_count,
            recovery_count: node.recovery_count,
            last_heartbeat: node.last_heartbeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub total_nodes: usize,
    pub current_node: Option<NodeSummary>,
    pub primary_node: Option<NodeSummary>,
    pub secondary_nodes: Vec<NodeSummary>,
    /// Every known node, ordered by id
    pub nodes: Vec<NodeSummary>,
    /// Newest last
    pub recent_events: Vec<FailoverEvent>,
    pub election_in_progress: bool,
    pub is_running: bool,
}

/// Events shown in [`ClusterStatus::recent_events`]
const RECENT_EVENTS: usize = 10;

impl ClusterStatus {
    /// Status of a cluster view; `current` is the local node, if any
    pub fn build(
        cluster_name: &str,
        config: &FailoverConfig,
        current: Option<&FailoverNode>,
        view: &[FailoverNode],
        events: &[FailoverEvent],
    ) -> Self {
        let now = Utc::now();
        let healthy = |node: &FailoverNode| {
            node.is_healthy_at(now, config.node_liveness(), config.healthy_score_threshold)
        };
        let summary = |node: &FailoverNode| NodeSummary::of(node, healthy(node));

        let mut sorted: Vec<&FailoverNode> = view.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let primary = select_primary(sorted.iter().copied(), healthy);
        let start = events.len().saturating_sub(RECENT_EVENTS);

        Self {
            cluster_id: format!("{}-cluster", cluster_name),
            total_nodes: sorted.len(),
            current_node: current.map(summary),
            primary_node: primary.map(summary),
            secondary_nodes: sorted
                .iter()
                .filter(|n| n.role == NodeRole::Secondary)
                .map(|n| summary(*n))
                .collect(),
            nodes: sorted.iter().map(|n| summary(*n)).collect(),
            recent_events: events[start..].to_vec(),
            election_in_progress: false,
            is_running: false,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSummary> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Active primary of a view, preferring a healthy one
fn select_primary<'a, I, F>(nodes: I, healthy: F) -> Option<&'a FailoverNode>
where
    I: IntoIterator<Item = &'a FailoverNode>,
    F: Fn(&FailoverNode) -> bool,
{
    let primaries: Vec<&FailoverNode> = nodes.into_iter().filter(|n| n.is_primary()).collect();
    primaries
        .iter()
        .find(|n| healthy(**n))
        .or_else(|| primaries.first())
        .copied()
}

/// Read every listed node record from the store
pub async fn load_cluster_view(store: &dyn CoordinationStore) -> Result<Vec<FailoverNode>> {
    let ids: Vec<String> = store.get_json(keys::CLUSTER_NODES).await?.unwrap_or_default();
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        match store.get_json::<FailoverNode>(&keys::ha_node(&id)).await {
            Ok(Some(node)) => nodes.push(node),
            Ok(None) => debug!("Node {} listed but its record expired", id),
            Err(Error::Serialization(e)) => warn!("Skipping corrupt node record {}: {}", id, e),
            Err(e) => return Err(e),
        }
    }
    Ok(nodes)
}

struct Inner {
    store: Arc<dyn CoordinationStore>,
    config: FailoverConfig,
    identity: NodeIdentity,
    health: HealthInputs,
    node: RwLock<FailoverNode>,
    cluster: RwLock<HashMap<String, FailoverNode>>,
    events: Mutex<VecDeque<FailoverEvent>>,
    callbacks: RwLock<Vec<FailoverCallback>>,
    election_in_progress: AtomicBool,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Cheaply cloneable handle to the local node's failover state machine
#[derive(Clone)]
pub struct FailoverManager {
    inner: Arc<Inner>,
}

impl FailoverManager {
    /// Manager whose health score only depends on the store round trip
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: FailoverConfig,
        identity: NodeIdentity,
    ) -> Self {
        let health = HealthInputs::store_only(store.clone());
        Self::with_health_inputs(store, config, identity, health)
    }

    pub fn with_health_inputs(
        store: Arc<dyn CoordinationStore>,
        config: FailoverConfig,
        identity: NodeIdentity,
        health: HealthInputs,
    ) -> Self {
        let mut node = FailoverNode::new(
            identity.id.clone(),
            NodeRole::Secondary,
            identity.host.clone(),
            identity.port,
        );
        node.metadata = identity.metadata.clone();

        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                identity,
                health,
                node: RwLock::new(node),
                cluster: RwLock::new(HashMap::new()),
                events: Mutex::new(VecDeque::new()),
                callbacks: RwLock::new(Vec::new()),
                election_in_progress: AtomicBool::new(false),
                running: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                shutdown,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.identity.id
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn election_in_progress(&self) -> bool {
        self.inner.election_in_progress.load(Ordering::SeqCst)
    }

    // === Lifecycle ===

    /// Publish the local node and start the heartbeat, monitor and
    /// election-check loops. A node asking for PRIMARY races for the
    /// primary lock right away.
    pub async fn start(&self, role: NodeRole, priority: i32) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(false);

        {
            let mut node = self.inner.node.write().await;
            node.role = role;
            node.priority = priority;
            node.state = FailoverState::Standby;
            node.last_heartbeat = Utc::now();
            node.metadata
                .insert("started_at".to_string(), Utc::now().to_rfc3339());
        }

        if let Err(e) = self.register_node().await {
            self.inner.running.store(false, Ordering::SeqCst);
            error!("Failed to join cluster: {}", e);
            return Err(e);
        }
        if let Err(e) = self.refresh().await {
            warn!("Initial cluster refresh failed: {}", e);
        }

        let handles = vec![
            tokio::spawn(self.clone().heartbeat_loop(self.inner.shutdown.subscribe())),
            tokio::spawn(self.clone().monitor_loop(self.inner.shutdown.subscribe())),
            tokio::spawn(self.clone().election_check_loop(self.inner.shutdown.subscribe())),
        ];
        self.inner.tasks.lock().await.extend(handles);

        if role == NodeRole::Primary {
            self.try_become_primary().await;
        }

        info!(
            "Failover manager started: {} ({}, priority {})",
            self.node_id(),
            role,
            priority
        );
        Ok(())
    }

    /// Stop every loop, hand the primary role over if this node holds it,
    /// then leave the cluster
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let tasks: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in tasks {
            let _ = handle.await;
        }

        if self.current_node().await.is_primary() {
            self.trigger_failover("shutdown").await;
        }

        if let Err(e) = self.deregister_node().await {
            warn!("Failed to remove {} from cluster: {}", self.node_id(), e);
        }
        METRICS.is_primary.set(0);
        info!("Failover manager stopped: {}", self.node_id());
    }

    pub async fn register_failover_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(FailoverSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: FailoverCallback = Arc::new(move |signal| callback(signal).boxed());
        self.inner.callbacks.write().await.push(callback);
    }

    // === Views ===

    pub async fn current_node(&self) -> FailoverNode {
        self.inner.node.read().await.clone()
    }

    pub async fn cluster_nodes(&self) -> Vec<FailoverNode> {
        self.inner.cluster.read().await.values().cloned().collect()
    }

    /// In-memory event ring, oldest first
    pub async fn events(&self) -> Vec<FailoverEvent> {
        self.inner.events.lock().await.iter().cloned().collect()
    }

    /// Active primary in the local view, preferring a healthy one
    pub async fn primary_node(&self) -> Option<FailoverNode> {
        let view = self.inner.cluster.read().await;
        let mut nodes: Vec<&FailoverNode> = view.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        select_primary(nodes, |n| self.is_node_healthy(n)).cloned()
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        let current = self.current_node().await;
        let view = self.cluster_nodes().await;
        let events = self.events().await;

        let mut status = ClusterStatus::build(
            &self.inner.identity.cluster_name,
            &self.inner.config,
            Some(&current),
            &view,
            &events,
        );
        status.election_in_progress = self.election_in_progress();
        status.is_running = self.is_running();
        status
    }

    // === Single iterations ===

    /// Take over a pending promotion, recompute the health score and
    /// republish the node record
    pub async fn heartbeat(&self) -> Result<()> {
        self.consume_promotion_notice().await?;

        let score = self.inner.health.score().await;
        let threshold = self.inner.config.healthy_score_threshold;
        let now = Utc::now();

        let recovered = {
            let mut node = self.inner.node.write().await;
            let previous = node.health_score;
            node.health_score = score;
            node.last_heartbeat = now;

            if score < threshold && previous >= threshold {
                node.failure_count += 1;
                node.last_failure = Some(now);
                warn!(
                    "Node {} health dropped to {:.1} (failure #{})",
                    node.id, score, node.failure_count
                );
                false
            } else if score >= threshold && previous < threshold {
                node.recovery_count += 1;
                node.last_recovery = Some(now);
                info!("Node {} health recovered to {:.1}", node.id, score);
                true
            } else {
                false
            }
        };
        METRICS.health_score.set(score.round() as u64);

        if recovered {
            self.record_event(FailoverEvent::new(
                EventType::Recovery,
                None,
                Some(self.node_id().to_string()),
                format!("health score recovered to {:.1}", score),
            ))
            .await;
        }

        self.register_node().await
    }

    /// Rebuild the local cluster view from the store
    pub async fn refresh(&self) -> Result<()> {
        self.consume_promotion_notice().await?;

        let nodes = load_cluster_view(self.inner.store.as_ref()).await?;
        let mut view: HashMap<String, FailoverNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        // the local record is authoritative for this node
        let me = self.current_node().await;
        if self.is_running() || view.contains_key(&me.id) {
            view.insert(me.id.clone(), me);
        }

        *self.inner.cluster.write().await = view;
        Ok(())
    }

    /// No healthy active primary is visible, this node may vote and no
    /// election is already running here
    pub async fn should_start_election(&self) -> bool {
        if self.election_in_progress() {
            return false;
        }
        if let Some(primary) = self.primary_node().await {
            if self.is_node_healthy(&primary) {
                return false;
            }
        }
        self.inner.node.read().await.role != NodeRole::Witness
    }

    /// Run one election if the election lock can be taken.
    ///
    /// Returns the promoted node; `None` when another election holds the
    /// lock, one is already running locally, or no node is eligible.
    pub async fn start_election(&self) -> Result<Option<FailoverNode>> {
        if self.inner.election_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let result = self.run_election().await;
        self.inner.election_in_progress.store(false, Ordering::SeqCst);
        result
    }

    /// Become primary if no healthy primary exists and the primary lock is
    /// free. Losing the race is not an error: a node that asked for PRIMARY
    /// stays on as SECONDARY.
    pub async fn try_become_primary(&self) -> bool {
        let me = self.current_node().await;
        if me.is_primary() {
            return true;
        }
        if let Some(primary) = self.primary_node().await {
            if primary.id != me.id && self.is_node_healthy(&primary) {
                info!("Cluster already has a healthy primary: {}", primary.id);
                self.settle_as_secondary().await;
                return false;
            }
        }

        let lock = PrimaryLock {
            node_id: me.id.clone(),
            acquired_at: Utc::now(),
        };
        match self
            .inner
            .store
            .set_json_nx(keys::PRIMARY_LOCK, &lock, self.inner.config.primary_lock_ttl())
            .await
        {
            Ok(true) => {
                self.promote_self("acquired primary lock").await;
                true
            }
            Ok(false) => {
                debug!("Primary lock held by another node");
                self.settle_as_secondary().await;
                false
            }
            Err(e) => {
                warn!("Failed to acquire primary lock: {}", e);
                self.settle_as_secondary().await;
                false
            }
        }
    }

    /// Hand the primary role to the best healthy secondary. Only the active
    /// primary may do this; returns whether a failover happened.
    pub async fn trigger_failover(&self, reason: &str) -> bool {
        let me = self.current_node().await;
        if !me.is_primary() {
            warn!("Only the active primary can trigger a failover");
            return false;
        }

        if let Err(e) = self.refresh().await {
            warn!("Cluster refresh before failover failed, using cached view: {}", e);
        }

        let view = self.cluster_nodes().await;
        let Some(target) = best_secondary(
            &view,
            &me.id,
            Utc::now(),
            self.inner.config.node_liveness(),
            self.inner.config.healthy_score_threshold,
        ) else {
            error!("No healthy secondary available for failover");
            return false;
        };

        match self.execute_failover(&me, target, reason).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failover failed: {}", e);
                false
            }
        }
    }

    // === Internals ===

    fn is_node_healthy(&self, node: &FailoverNode) -> bool {
        node.is_healthy_at(
            Utc::now(),
            self.inner.config.node_liveness(),
            self.inner.config.healthy_score_threshold,
        )
    }

    /// Write the local record and make sure it is listed
    async fn register_node(&self) -> Result<()> {
        let node = self.current_node().await;
        let store = &self.inner.store;

        store
            .set_json(&keys::ha_node(&node.id), &node, self.inner.config.node_ttl())
            .await?;

        let mut ids: Vec<String> = store.get_json(keys::CLUSTER_NODES).await?.unwrap_or_default();
        if !ids.contains(&node.id) {
            ids.push(node.id.clone());
        }
        store
            .set_json(keys::CLUSTER_NODES, &ids, self.inner.config.cluster_ttl())
            .await?;

        self.inner.cluster.write().await.insert(node.id.clone(), node);
        Ok(())
    }

    async fn deregister_node(&self) -> Result<()> {
        let id = self.node_id().to_string();
        let store = &self.inner.store;

        self.inner.cluster.write().await.remove(&id);
        store.delete(&keys::ha_node(&id)).await?;

        if let Some(mut ids) = store.get_json::<Vec<String>>(keys::CLUSTER_NODES).await? {
            ids.retain(|n| n != &id);
            if ids.is_empty() {
                store.delete(keys::CLUSTER_NODES).await?;
            } else {
                store
                    .set_json(keys::CLUSTER_NODES, &ids, self.inner.config.cluster_ttl())
                    .await?;
            }
        }
        info!("Node {} left the cluster", id);
        Ok(())
    }

    async fn consume_promotion_notice(&self) -> Result<bool> {
        let key = keys::ha_promotion(self.node_id());
        let Some(notice) = self.inner.store.get_json::<PromotionNotice>(&key).await? else {
            return Ok(false);
        };
        self.inner.store.delete(&key).await?;

        info!(
            "Promotion hand-off from {}: {}",
            notice.from_node, notice.reason
        );
        self.promote_self(&notice.reason).await;
        Ok(true)
    }

    async fn run_election(&self) -> Result<Option<FailoverNode>> {
        let election_id = generate_id();
        let lock = ElectionLock {
            election_id: election_id.clone(),
            initiator: self.node_id().to_string(),
            started_at: Utc::now(),
        };
        let acquired = self
            .inner
            .store
            .set_json_nx(keys::ELECTION_LOCK, &lock, self.inner.config.election_timeout())
            .await?;
        if !acquired {
            debug!("Another election is in progress");
            return Ok(None);
        }

        METRICS.elections_started.inc();
        info!("Starting election {}", election_id);

        if let Err(e) = self.refresh().await {
            warn!("Election {} running on cached view: {}", election_id, e);
        }

        let view = self.cluster_nodes().await;
        let candidates = eligible_candidates(
            &view,
            Utc::now(),
            self.inner.config.node_liveness(),
            self.inner.config.healthy_score_threshold,
        );
        let Some(winner) = candidates.first().cloned() else {
            // the lock is left to expire
            warn!("Election {}: no eligible candidates", election_id);
            return Ok(None);
        };

        let event = self
            .record_event(
                FailoverEvent::new(
                    EventType::Election,
                    None,
                    Some(winner.id.clone()),
                    format!("Election {}", election_id),
                )
                .with_metadata(json!({
                    "candidates": candidates.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                    "winner_priority": winner.priority,
                    "winner_health": winner.health_score,
                })),
            )
            .await;
        info!(
            "Election {} won by {} (priority {}, health {:.1})",
            election_id, winner.id, winner.priority, winner.health_score
        );

        let reason = format!("won election {}", election_id);
        let me = self.current_node().await;
        if me.is_primary() && winner.id != me.id {
            self.demote_self(&reason).await;
        }
        self.promote(winner.clone(), &reason, Some(event.id)).await?;

        if let Err(e) = self.inner.store.delete(keys::ELECTION_LOCK).await {
            warn!("Failed to release election lock: {}", e);
        }
        METRICS.elections_completed.inc();
        Ok(Some(winner))
    }

    async fn execute_failover(
        &self,
        me: &FailoverNode,
        target: FailoverNode,
        reason: &str,
    ) -> Result<()> {
        info!("Failing over {} -> {} ({})", me.id, target.id, reason);

        let event = self
            .record_event(FailoverEvent::new(
                EventType::Failover,
                Some(me.id.clone()),
                Some(target.id.clone()),
                reason,
            ))
            .await;
        METRICS.failovers.inc();

        self.demote_self(reason).await;
        let target_id = target.id.clone();
        self.promote(target, reason, Some(event.id)).await?;

        info!("Failover to {} complete", target_id);
        Ok(())
    }

    async fn promote(
        &self,
        target: FailoverNode,
        reason: &str,
        event_id: Option<String>,
    ) -> Result<()> {
        if target.id == self.node_id() {
            self.promote_self(reason).await;
            return Ok(());
        }

        let now = Utc::now();
        let store = &self.inner.store;
        let node_key = keys::ha_node(&target.id);

        // a record that already expired is not resurrected
        let existing = store.get_json::<FailoverNode>(&node_key).await?;
        let published = existing.is_some();
        let mut promoted = existing.unwrap_or(target);
        promoted.role = NodeRole::Primary;
        promoted.state = FailoverState::Active;
        promoted.promoted_at = Some(now);

        if published {
            store
                .set_json(&node_key, &promoted, self.inner.config.node_ttl())
                .await?;
        }

        let notice = PromotionNotice {
            from_node: self.node_id().to_string(),
            reason: reason.to_string(),
            event_id,
            issued_at: now,
        };
        store
            .set_json(
                &keys::ha_promotion(&promoted.id),
                &notice,
                self.inner.config.failover_timeout(),
            )
            .await?;

        info!("Node {} promoted to primary", promoted.id);
        self.inner
            .cluster
            .write()
            .await
            .insert(promoted.id.clone(), promoted);
        Ok(())
    }

    async fn promote_self(&self, reason: &str) {
        let was_primary = {
            let mut node = self.inner.node.write().await;
            let was_primary = node.is_primary();
            node.role = NodeRole::Primary;
            node.state = FailoverState::Active;
            if !was_primary {
                node.promoted_at = Some(Utc::now());
            }
            was_primary
        };

        if let Err(e) = self.register_node().await {
            warn!("Failed to publish promotion of {}: {}", self.node_id(), e);
        }
        if was_primary {
            return;
        }

        METRICS.promotions.inc();
        METRICS.is_primary.set(1);
        info!("Node {} is now primary ({})", self.node_id(), reason);
        self.fire_callbacks(FailoverSignal::PromotedToPrimary).await;
    }

    async fn demote_self(&self, reason: &str) {
        let was_primary = {
            let mut node = self.inner.node.write().await;
            let was_primary = node.is_primary();
            node.role = NodeRole::Secondary;
            node.state = FailoverState::Standby;
            node.promoted_at = None;
            was_primary
        };

        if let Err(e) = self.register_node().await {
            warn!("Failed to publish demotion of {}: {}", self.node_id(), e);
        }
        self.release_primary_lock().await;
        if !was_primary {
            return;
        }

        METRICS.demotions.inc();
        METRICS.is_primary.set(0);
        info!("Node {} stepped down to secondary ({})", self.node_id(), reason);
        self.fire_callbacks(FailoverSignal::DemotedToSecondary).await;
    }

    /// Drop a requested-but-not-held PRIMARY role back to SECONDARY/STANDBY
    async fn settle_as_secondary(&self) {
        {
            let mut node = self.inner.node.write().await;
            if node.role != NodeRole::Primary || node.is_primary() {
                return;
            }
            node.role = NodeRole::Secondary;
            node.state = FailoverState::Standby;
        }
        info!("Node {} lost the primary race, continuing as secondary", self.node_id());
        if let Err(e) = self.register_node().await {
            warn!("Failed to publish role of {}: {}", self.node_id(), e);
        }
    }

    async fn release_primary_lock(&self) {
        let store = &self.inner.store;
        match store.get_json::<PrimaryLock>(keys::PRIMARY_LOCK).await {
            Ok(Some(lock)) if lock.node_id == self.node_id() => {
                if let Err(e) = store.delete(keys::PRIMARY_LOCK).await {
                    warn!("Failed to release primary lock: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Primary lock lookup failed: {}", e),
        }
    }

    async fn fire_callbacks(&self, signal: FailoverSignal) {
        let callbacks = self.inner.callbacks.read().await.clone();
        for callback in callbacks {
            if let Err(e) = callback(signal).await {
                error!("Failover callback failed on {}: {}", signal, e);
            }
        }
    }

    async fn record_event(&self, event: FailoverEvent) -> FailoverEvent {
        if let Err(e) = self
            .inner
            .store
            .set_json(&keys::ha_event(&event.id), &event, self.inner.config.event_ttl())
            .await
        {
            warn!("Failed to persist {} event {}: {}", event.event_type, event.id, e);
        }

        let mut events = self.inner.events.lock().await;
        events.push_back(event.clone());
        while events.len() > self.inner.config.event_history {
            events.pop_front();
        }
        event
    }

    /// Drop events older than the event TTL from the ring
    async fn prune_events(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.inner.config.event_ttl_secs as i64);
        self.inner
            .events
            .lock()
            .await
            .retain(|event| event.timestamp > cutoff);
    }

    /// Monitor pass: refresh the view and start an election when the
    /// primary is missing or unhealthy
    async fn check_primary_health(&self) -> Result<()> {
        self.refresh().await?;

        let me = self.current_node().await;
        let threshold = self.inner.config.healthy_score_threshold;

        if me.is_primary() {
            if me.health_score < threshold {
                warn!(
                    "Primary {} degraded (score {:.1}), starting election",
                    me.id, me.health_score
                );
                self.start_election().await?;
            }
        } else if me.role == NodeRole::Secondary && !self.election_in_progress() {
            match self.primary_node().await {
                None => {
                    warn!("No primary in cluster, starting election");
                    self.start_election().await?;
                }
                Some(primary) if !self.is_node_healthy(&primary) => {
                    warn!("Primary {} is unhealthy, starting election", primary.id);
                    self.start_election().await?;
                }
                Some(_) => {}
            }
        }

        self.prune_events().await;
        Ok(())
    }

    async fn heartbeat_loop(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.heartbeat_interval();
        let mut delay = interval;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            delay = match self.heartbeat().await {
                Ok(()) => interval,
                Err(e) => {
                    let backoff = self.inner.config.error_backoff();
                    warn!("Heartbeat failed: {}, retrying in {:?}", e, backoff);
                    backoff
                }
            };
        }
    }

    async fn monitor_loop(self, mut shutdown: watch::Receiver<bool>) {
        self.run_periodic(&mut shutdown, self.inner.config.monitor_interval(), |manager| {
            async move {
                if let Err(e) = manager.check_primary_health().await {
                    warn!("Cluster monitor pass failed: {}", e);
                }
            }
            .boxed()
        })
        .await;
    }

    async fn election_check_loop(self, mut shutdown: watch::Receiver<bool>) {
        self.run_periodic(
            &mut shutdown,
            self.inner.config.election_check_interval(),
            |manager| {
                async move {
                    if manager.should_start_election().await {
                        if let Err(e) = manager.start_election().await {
                            warn!("Election failed: {}", e);
                        }
                    }
                }
                .boxed()
            },
        )
        .await;
    }

    async fn run_periodic<F>(&self, shutdown: &mut watch::Receiver<bool>, every: Duration, tick: F)
    where
        F: Fn(FailoverManager) -> BoxFuture<'static, ()>,
    {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(every) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            tick(self.clone()).await;
        }
    }
}
