//! Common utilities and types shared across fleetcoord

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod utils;

pub use config::{Config, FailoverConfig, NodeConfig, RegistryConfig, StoreConfig};
pub use error::{Error, Result};
pub use hash::{hash_key, modulo_index};
pub use metrics::{MetricsRegistry, METRICS};
pub use utils::{duration_ms, generate_id, local_ip, parse_duration, retry_with_backoff};
