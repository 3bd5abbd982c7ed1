//! Cluster membership records and failover events

use crate::common::{generate_id, local_ip, NodeConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Liveness window used by [`FailoverNode::is_healthy`]
pub const DEFAULT_LIVENESS_SECS: i64 = 30;
/// Minimum health score of a healthy node
pub const DEFAULT_HEALTHY_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    #[default]
    Secondary,
    /// Member that never stands for election
    Witness,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Secondary => write!(f, "secondary"),
            NodeRole::Witness => write!(f, "witness"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = crate::common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(NodeRole::Primary),
            "secondary" => Ok(NodeRole::Secondary),
            "witness" => Ok(NodeRole::Witness),
            other => Err(crate::common::Error::InvalidConfig(format!(
                "unknown node role: {}",
                other
            ))),
        }
    }
}

/// Only `Standby` and `Active` are reached by the current transitions;
/// the rest are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverState {
    Active,
    #[default]
    Standby,
    Failover,
    Recovering,
    Failed,
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverState::Active => write!(f, "active"),
            FailoverState::Standby => write!(f, "standby"),
            FailoverState::Failover => write!(f, "failover"),
            FailoverState::Recovering => write!(f, "recovering"),
            FailoverState::Failed => write!(f, "failed"),
        }
    }
}

/// One cluster participant, as written to `ha_node:{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverNode {
    pub id: String,
    pub role: NodeRole,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub state: FailoverState,
    /// Higher wins elections
    pub priority: i32,
    /// 0 to 100
    pub health_score: f64,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovery_count: u32,
    #[serde(default)]
    pub last_recovery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub promoted_at: Option<DateTime<Utc>>,
}

impl FailoverNode {
    pub fn new(id: impl Into<String>, role: NodeRole, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            role,
            host: host.into(),
            port,
            state: FailoverState::Standby,
            priority: 1,
            health_score: 100.0,
            last_heartbeat: Utc::now(),
            metadata: HashMap::new(),
            failure_count: 0,
            last_failure: None,
            recovery_count: 0,
            last_recovery: None,
            promoted_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat within `liveness` of `now` and score at least `threshold`
    pub fn is_healthy_at(&self, now: DateTime<Utc>, liveness: ChronoDuration, threshold: f64) -> bool {
        now - self.last_heartbeat <= liveness && self.health_score >= threshold
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(
            Utc::now(),
            ChronoDuration::seconds(DEFAULT_LIVENESS_SECS),
            DEFAULT_HEALTHY_SCORE,
        )
    }

    /// Role PRIMARY and state ACTIVE
    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary && self.state == FailoverState::Active
    }
}

/// Static identity of the local node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub cluster_name: String,
    pub metadata: HashMap<String, String>,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            cluster_name: "fleet".to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Identity from the `[node]` config section; missing id and host
    /// default to a fresh UUID and the outbound interface address
    pub fn from_config(config: &NodeConfig) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("service_name".to_string(), config.service_name.clone());
        metadata.insert("version".to_string(), config.version.clone());
        Self {
            id: config.id.clone().unwrap_or_else(generate_id),
            host: config
                .host
                .clone()
                .unwrap_or_else(|| local_ip().to_string()),
            port: config.port,
            cluster_name: config.cluster_name.clone(),
            metadata,
        }
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Election,
    Failover,
    Recovery,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Election => write!(f, "election"),
            EventType::Failover => write!(f, "failover"),
            EventType::Recovery => write!(f, "recovery"),
        }
    }
}

/// Audit record of a role change, stored under `ha_event:{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: String,
    pub event_type: EventType,
    pub from_node: Option<String>,
    pub to_node: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl FailoverEvent {
    pub fn new(
        event_type: EventType,
        from_node: Option<String>,
        to_node: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            event_type,
            from_node,
            to_node,
            reason: reason.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Role change delivered to failover callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverSignal {
    PromotedToPrimary,
    DemotedToSecondary,
}

impl fmt::Display for FailoverSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverSignal::PromotedToPrimary => write!(f, "promoted_to_primary"),
            FailoverSignal::DemotedToSecondary => write!(f, "demoted_to_secondary"),
        }
    }
}

/// Hand-off left at `ha_promotion:{id}` when a node promotes another one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionNotice {
    pub from_node: String,
    pub reason: String,
    pub event_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Holder of `ha_cluster:primary_lock`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryLock {
    pub node_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Holder of the election lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionLock {
    pub election_id: String,
    pub initiator: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_healthy_window_and_score() {
        let now = Utc::now();
        let liveness = ChronoDuration::seconds(30);
        let mut node = FailoverNode::new("n1", NodeRole::Secondary, "10.0.0.1", 8080);
        node.last_heartbeat = now - ChronoDuration::seconds(10);
        assert!(node.is_healthy_at(now, liveness, 50.0));

        node.health_score = 49.9;
        assert!(!node.is_healthy_at(now, liveness, 50.0));

        node.health_score = 50.0;
        node.last_heartbeat = now - ChronoDuration::seconds(31);
        assert!(!node.is_healthy_at(now, liveness, 50.0));
    }

    #[test]
    fn test_is_primary_needs_active_state() {
        let mut node = FailoverNode::new("n1", NodeRole::Primary, "h", 1);
        assert!(!node.is_primary());
        node.state = FailoverState::Active;
        assert!(node.is_primary());
    }

    #[test]
    fn test_role_parse_and_serde() {
        assert_eq!("PRIMARY".parse::<NodeRole>().unwrap(), NodeRole::Primary);
        assert!("leader".parse::<NodeRole>().is_err());
        assert_eq!(
            serde_json::to_string(&FailoverState::Standby).unwrap(),
            "\"standby\""
        );
        assert_eq!(
            serde_json::to_string(&FailoverSignal::PromotedToPrimary).unwrap(),
            "\"promoted_to_primary\""
        );
    }

    #[test]
    fn test_identity_from_config() {
        let config = NodeConfig {
            id: Some("node-a".to_string()),
            host: Some("10.1.1.1".to_string()),
            ..Default::default()
        };
        let identity = NodeIdentity::from_config(&config);
        assert_eq!(identity.id, "node-a");
        assert_eq!(identity.host, "10.1.1.1");
        assert_eq!(identity.metadata["service_name"], config.service_name);

        let generated = NodeIdentity::from_config(&NodeConfig::default());
        assert!(!generated.id.is_empty());
    }
}
