//! Active health probing of registered instances

use super::instance::{ServiceInstance, ServiceStatus};
use crate::common::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn ok(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    pub fn failed(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Something that can tell whether an instance answers its health endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// `GET url`; only HTTP 200 within the timeout counts as success
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fleetcoord-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("probe HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                ProbeOutcome::ok(start.elapsed())
            }
            Ok(resp) => ProbeOutcome::failed(start.elapsed(), format!("HTTP {}", resp.status())),
            Err(e) if e.is_timeout() => {
                ProbeOutcome::failed(start.elapsed(), format!("timed out after {:?}", timeout))
            }
            Err(e) => ProbeOutcome::failed(start.elapsed(), e.to_string()),
        }
    }
}

/// Fold a probe outcome into an instance; returns true when the status changed.
///
/// Success resets the failure streak and marks the instance healthy. A
/// failure extends the streak and only flips the status once the streak
/// reaches `unhealthy_threshold`. Latency is averaged on success only.
pub fn apply_probe_outcome(
    instance: &mut ServiceInstance,
    outcome: &ProbeOutcome,
    unhealthy_threshold: u32,
    now: DateTime<Utc>,
) -> bool {
    let before = instance.status;
    instance.last_health_check = Some(now);

    if outcome.success {
        instance.consecutive_failures = 0;
        instance.status = ServiceStatus::Healthy;
        instance.record_response_time(outcome.latency);
    } else {
        instance.consecutive_failures = instance.consecutive_failures.saturating_add(1);
        if instance.consecutive_failures >= unhealthy_threshold {
            instance.status = ServiceStatus::Unhealthy;
        }
    }

    before != instance.status
}
