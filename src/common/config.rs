//! Configuration for fleetcoord components
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! `FLEETCOORD_*` environment variables (`__` separates sections, e.g.
//! `FLEETCOORD_FAILOVER__HEARTBEAT_INTERVAL_SECS=5`).

use crate::failover::NodeRole;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when no explicit path is given (optional)
pub const DEFAULT_CONFIG_FILE: &str = "fleetcoord.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub failover: FailoverConfig,
    pub store: StoreConfig,

    /// Logging level (overridden by RUST_LOG)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            registry: RegistryConfig::default(),
            failover: FailoverConfig::default(),
            store: StoreConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, file and environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("FLEETCOORD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordination loops cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let f = &self.failover;
        let r = &self.registry;

        let intervals = [
            ("failover.heartbeat_interval_secs", f.heartbeat_interval_secs),
            ("failover.monitor_interval_secs", f.monitor_interval_secs),
            ("failover.election_check_interval_secs", f.election_check_interval_secs),
            ("failover.election_timeout_secs", f.election_timeout_secs),
            ("registry.cleanup_interval_secs", r.cleanup_interval_secs),
            ("registry.supervisor_interval_secs", r.supervisor_interval_secs),
            ("registry.default_check_interval_secs", r.default_check_interval_secs),
            ("registry.default_check_timeout_secs", r.default_check_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(crate::Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }

        if f.heartbeat_interval_secs >= f.node_liveness_secs {
            return Err(crate::Error::InvalidConfig(format!(
                "heartbeat interval ({}s) must be shorter than the liveness window ({}s)",
                f.heartbeat_interval_secs, f.node_liveness_secs
            )));
        }

        if !(0.0..=100.0).contains(&f.healthy_score_threshold) {
            return Err(crate::Error::InvalidConfig(
                "failover.healthy_score_threshold must be within 0..=100".into(),
            ));
        }

        if r.unhealthy_threshold == 0 {
            return Err(crate::Error::InvalidConfig(
                "registry.unhealthy_threshold must be > 0".into(),
            ));
        }

        Ok(())
    }
}

/// Identity of the local process within the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node ID (random UUID when absent)
    pub id: Option<String>,

    /// Advertised host (detected when absent)
    pub host: Option<String>,

    /// Advertised port
    pub port: u16,

    /// Requested role at start-up
    pub role: NodeRole,

    /// Election priority (higher wins)
    pub priority: i32,

    /// Logical cluster this node coordinates within
    pub cluster_name: String,

    /// Service this node registers itself under
    pub service_name: String,

    pub version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            host: None,
            port: 8080,
            role: NodeRole::Secondary,
            priority: 1,
            cluster_name: "fleet".to_string(),
            service_name: "fleetcoord".to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// TTL of instance records and service id-lists
    pub instance_ttl_secs: u64,

    /// TTL of health snapshots
    pub health_snapshot_ttl_secs: u64,

    pub cleanup_interval_secs: u64,
    pub supervisor_interval_secs: u64,

    /// Instances silent for longer than this are purged
    pub heartbeat_expiry_secs: u64,

    /// Consecutive probe failures before an instance turns unhealthy
    pub unhealthy_threshold: u32,

    /// Probe interval for instances that declare none
    pub default_check_interval_secs: u64,

    /// Probe timeout for instances that declare none
    pub default_check_timeout_secs: u64,

    /// Sleep after a failed probe iteration
    pub error_backoff_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instance_ttl_secs: 300,
            health_snapshot_ttl_secs: 120,
            cleanup_interval_secs: 60,
            supervisor_interval_secs: 10,
            heartbeat_expiry_secs: 300,
            unhealthy_threshold: 3,
            default_check_interval_secs: 30,
            default_check_timeout_secs: 5,
            error_backoff_secs: 60,
        }
    }
}

impl RegistryConfig {
    pub fn instance_ttl(&self) -> Duration {
        Duration::from_secs(self.instance_ttl_secs)
    }

    pub fn health_snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.health_snapshot_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs)
    }

    pub fn heartbeat_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_expiry_secs as i64)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Failover manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub heartbeat_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub election_check_interval_secs: u64,

    /// TTL of the election lock
    pub election_timeout_secs: u64,

    /// TTL of promotion hand-off notices
    pub failover_timeout_secs: u64,

    /// A node whose last heartbeat is older than this is not healthy
    pub node_liveness_secs: u64,

    /// Minimum health score for a node to count as healthy
    pub healthy_score_threshold: f64,

    pub node_ttl_secs: u64,
    pub cluster_ttl_secs: u64,
    pub primary_lock_ttl_secs: u64,
    pub event_ttl_secs: u64,

    /// Size of the in-memory event ring
    pub event_history: usize,

    /// Sleep after a failed health-scoring iteration
    pub error_backoff_secs: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            monitor_interval_secs: 15,
            election_check_interval_secs: 20,
            election_timeout_secs: 30,
            failover_timeout_secs: 60,
            node_liveness_secs: 30,
            healthy_score_threshold: 50.0,
            node_ttl_secs: 60,
            cluster_ttl_secs: 300,
            primary_lock_ttl_secs: 30,
            event_ttl_secs: 86_400,
            event_history: 100,
            error_backoff_secs: 60,
        }
    }
}

impl FailoverConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn election_check_interval(&self) -> Duration {
        Duration::from_secs(self.election_check_interval_secs)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_secs(self.election_timeout_secs)
    }

    pub fn failover_timeout(&self) -> Duration {
        Duration::from_secs(self.failover_timeout_secs)
    }

    pub fn node_liveness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.node_liveness_secs as i64)
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.node_ttl_secs)
    }

    pub fn cluster_ttl(&self) -> Duration {
        Duration::from_secs(self.cluster_ttl_secs)
    }

    pub fn primary_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.primary_lock_ttl_secs)
    }

    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Shared store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of a `fleetcoord-store` server; in-process store when absent
    pub url: Option<String>,

    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_ms: 2_000,
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
