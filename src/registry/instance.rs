//! Service instance records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Lifecycle status of a registered instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
    Stopping,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Healthy => write!(f, "healthy"),
            ServiceStatus::Unhealthy => write!(f, "unhealthy"),
            ServiceStatus::Stopping => write!(f, "stopping"),
        }
    }
}

fn default_weight() -> u32 {
    1
}

/// One registered, load-balanceable endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    /// Logical service name
    pub name: String,
    pub host: String,
    pub port: u16,
    pub version: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub status: ServiceStatus,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Probe path (`/health`) or absolute URL
    #[serde(default)]
    pub health_check_url: Option<String>,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,

    // Runtime stats
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub active_connections: u32,
    /// Seconds
    #[serde(default)]
    pub response_time_avg: f64,

    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: crate::common::generate_id(),
            name: name.into(),
            host: host.into(),
            port,
            version: "1.0.0".to_string(),
            weight: 1,
            status: ServiceStatus::Unknown,
            metadata: HashMap::new(),
            health_check_url: None,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            last_health_check: None,
            consecutive_failures: 0,
            total_requests: 0,
            active_connections: 0,
            response_time_avg: 0.0,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Weights below 1 are raised to 1
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(
        mut self,
        url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        self.health_check_url = Some(url.into());
        self.health_check_interval_secs = interval.as_secs().max(1);
        self.health_check_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Absolute probe URL, if the instance declares a health check
    pub fn probe_url(&self) -> Option<String> {
        let url = self.health_check_url.as_deref()?;
        if url.starts_with("http://") || url.starts_with("https://") {
            return Some(url.to_string());
        }
        let path = url.trim_start_matches('/');
        Some(format!("{}/{}", self.base_url(), path))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs.max(1))
    }

    pub fn effective_weight(&self) -> u32 {
        self.weight.max(1)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }

    /// Lower is better: connections per unit of weight, plus average
    /// latency in seconds, plus 0.1 per recent failure
    pub fn load_score(&self) -> f64 {
        self.active_connections as f64 / self.effective_weight() as f64
            + self.response_time_avg
            + 0.1 * self.consecutive_failures as f64
    }

    /// Two-sample average: `avg = (avg + sample) / 2`
    pub fn record_response_time(&mut self, sample: Duration) {
        self.response_time_avg = (self.response_time_avg + sample.as_secs_f64()) / 2.0;
    }

    /// Time since the last heartbeat
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }
}

/// Probe outcome mirrored to the store independently of the instance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub instance_id: String,
    pub service: String,
    pub status: ServiceStatus,
    pub consecutive_failures: u32,
    pub response_time_avg: f64,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    pub fn of(instance: &ServiceInstance, last_error: Option<String>) -> Self {
        Self {
            instance_id: instance.id.clone(),
            service: instance.name.clone(),
            status: instance.status,
            consecutive_failures: instance.consecutive_failures,
            response_time_avg: instance.response_time_avg,
            checked_at: instance.last_health_check.unwrap_or_else(Utc::now),
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_score() {
        let mut instance = ServiceInstance::new("api", "10.0.0.1", 8080).with_weight(2);
        instance.active_connections = 4;
        instance.response_time_avg = 0.25;
        instance.consecutive_failures = 2;
        let expected = 4.0 / 2.0 + 0.25 + 0.2;
        assert!((instance.load_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_response_time_two_sample_average() {
        let mut instance = ServiceInstance::new("api", "10.0.0.1", 8080);
        instance.record_response_time(Duration::from_millis(200));
        assert!((instance.response_time_avg - 0.1).abs() < 1e-9);
        instance.record_response_time(Duration::from_millis(300));
        assert!((instance.response_time_avg - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_weight_floor() {
        let instance = ServiceInstance::new("api", "h", 1).with_weight(0);
        assert_eq!(instance.weight, 1);
    }

    #[test]
    fn test_probe_url() {
        let plain = ServiceInstance::new("api", "10.0.0.1", 8080);
        assert_eq!(plain.probe_url(), None);

        let relative = plain.clone().with_health_check(
            "/health",
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        assert_eq!(
            relative.probe_url().as_deref(),
            Some("http://10.0.0.1:8080/health")
        );

        let absolute = plain.with_health_check(
            "http://sidecar:9000/ready",
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        assert_eq!(
            absolute.probe_url().as_deref(),
            Some("http://sidecar:9000/ready")
        );
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ServiceStatus::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
        let instance = ServiceInstance::new("api", "h", 1).with_status(ServiceStatus::Healthy);
        let decoded: ServiceInstance =
            serde_json::from_str(&serde_json::to_string(&instance).unwrap()).unwrap();
        assert_eq!(decoded, instance);
    }
}
