//! Primary/secondary failover
//!
//! Leader election here is best effort: the primary and election locks are
//! TTL leases in the shared store without fencing tokens, so a partitioned
//! primary may keep serving until its record expires.

pub mod election;
pub mod health;
pub mod manager;
pub mod node;

pub use election::{best_secondary, conduct_election, eligible_candidates, rank_candidates};
pub use health::{compute_health_score, ComponentHealth, HealthCheck, HealthInputs, StoreHealthCheck};
pub use manager::{load_cluster_view, ClusterStatus, FailoverCallback, FailoverManager, NodeSummary};
pub use node::{
    EventType, FailoverEvent, FailoverNode, FailoverSignal, FailoverState, NodeIdentity, NodeRole,
    PromotionNotice,
};
