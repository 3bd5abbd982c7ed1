//! Shared coordination store
//!
//! Every piece of cross-node state lives behind [`CoordinationStore`]: a
//! key-value store with per-key TTL and set-if-absent. Nodes never talk to
//! each other directly.

pub mod http;
pub mod memory;
pub mod server;

pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::common::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Contract the core needs from the shared store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `SET key value TTL`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// `SET key value TTL IF NOT EXISTS`; true when this call stored the value
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;

    /// `DELETE key`; true when a live key was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Cheap round trip used for health scoring
    async fn ping(&self) -> Result<()>;
}

/// JSON helpers over any [`CoordinationStore`]
#[async_trait]
pub trait StoreExt: CoordinationStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl).await
    }

    async fn set_json_nx<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set_nx(key, bytes, ttl).await
    }
}

impl<S: CoordinationStore + ?Sized> StoreExt for S {}

/// Key scheme shared by every node
pub mod keys {
    /// Serialized `ServiceInstance`
    pub fn service_instance(service: &str, instance_id: &str) -> String {
        format!("service_instance:{}:{}", service, instance_id)
    }

    /// Ordered list of instance ids of one service
    pub fn service_registry(service: &str) -> String {
        format!("service_registry:{}", service)
    }

    /// Latest probe snapshot of one instance
    pub fn service_health(service: &str, instance_id: &str) -> String {
        format!("service_health:{}:{}", service, instance_id)
    }

    /// Serialized `FailoverNode`
    pub fn ha_node(node_id: &str) -> String {
        format!("ha_node:{}", node_id)
    }

    /// Pending promotion notice addressed to one node
    pub fn ha_promotion(node_id: &str) -> String {
        format!("ha_promotion:{}", node_id)
    }

    /// Serialized `FailoverEvent`
    pub fn ha_event(event_id: &str) -> String {
        format!("ha_event:{}", event_id)
    }

    /// List of node ids in the cluster
    pub const CLUSTER_NODES: &str = "ha_cluster:nodes";

    /// Advisory lock taken by a node racing to become primary at start-up
    pub const PRIMARY_LOCK: &str = "ha_cluster:primary_lock";

    /// Advisory lock held for the duration of one election; the value
    /// carries the election id
    pub const ELECTION_LOCK: &str = "ha_election:current";
}
