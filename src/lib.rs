//! # fleetcoord
//!
//! Self-coordination for a fleet of service instances:
//! - Service registry with TTL-backed records and active HTTP health probes
//! - Load balancing (round robin, weighted, least connections, random, hashed)
//! - Primary/secondary failover with best-effort leader election
//!
//! Nodes share state only through a key-value store with per-key TTL and
//! set-if-absent; they never call each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Node A       │   │ Node B       │   │ Node C       │
//! │  registry    │   │  registry    │   │  registry    │
//! │  balancer    │   │  balancer    │   │  balancer    │
//! │  failover    │   │  failover    │   │  failover    │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ GET / SET+TTL / SET NX / DELETE     │
//!        └──────────────────┼──────────────────┘
//!                   ┌───────▼────────┐
//!                   │ shared store   │
//!                   └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the shared store
//! ```bash
//! fleetcoord-store serve --bind 0.0.0.0:7000
//! ```
//!
//! ### Start nodes
//! ```bash
//! fleetcoord-node serve --id node-a --bind 0.0.0.0:8080 \
//!   --store http://localhost:7000 --role primary --priority 10
//! fleetcoord-node serve --id node-b --bind 0.0.0.0:8081 \
//!   --store http://localhost:7000 --role secondary --priority 5
//! ```
//!
//! ### Inspect the fleet
//! ```bash
//! fleetcoord --store http://localhost:7000 status
//! fleetcoord --store http://localhost:7000 select fleetcoord --strategy least_connections
//! ```

pub mod admin;
pub mod balancer;
pub mod common;
pub mod failover;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use balancer::{LoadBalancer, LoadBalancerPool, RequestContext, Strategy};
pub use common::{Config, Error, Result};
pub use failover::{FailoverManager, FailoverSignal, NodeIdentity, NodeRole};
pub use registry::{ServiceInstance, ServiceRegistry, ServiceStatus};
pub use store::{CoordinationStore, HttpStore, MemoryStore};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
