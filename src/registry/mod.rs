//! Service registration, discovery and active health checking

pub mod health;
pub mod instance;
pub mod service;

pub use health::{apply_probe_outcome, HealthProbe, HttpProbe, ProbeOutcome};
pub use instance::{HealthSnapshot, ServiceInstance, ServiceStatus};
pub use service::{RegistryStats, ServiceCounts, ServiceRegistry};
