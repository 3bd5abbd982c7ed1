//! Selection strategies
//!
//! Every strategy is a pure function of the healthy list, a rotation counter
//! and the request context, so the same list in the same order always maps
//! the same counter value to the same instance.

use crate::common::{modulo_index, Error};
use crate::registry::ServiceInstance;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    ConsistentHash,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::RoundRobin,
        Strategy::WeightedRoundRobin,
        Strategy::LeastConnections,
        Strategy::Random,
        Strategy::ConsistentHash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::Random => "random",
            Strategy::ConsistentHash => "consistent_hash",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| Error::UnknownStrategy(s.to_string()))
    }
}

/// Per-request input to selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Routing key for [`Strategy::ConsistentHash`]
    pub hash_key: Option<String>,
}

impl RequestContext {
    pub fn with_hash_key(key: impl Into<String>) -> Self {
        Self {
            hash_key: Some(key.into()),
        }
    }
}

/// Pick one instance from `instances` (already filtered to healthy).
///
/// `counter` is advanced by the rotating strategies; concurrent callers may
/// repeat or skip a slot, which only skews the rotation slightly.
pub fn select_from(
    instances: &[ServiceInstance],
    strategy: Strategy,
    counter: &AtomicUsize,
    ctx: Option<&RequestContext>,
) -> Option<ServiceInstance> {
    if instances.is_empty() {
        return None;
    }

    let picked = match strategy {
        Strategy::RoundRobin => round_robin(instances, counter),
        Strategy::WeightedRoundRobin => weighted_round_robin(instances, counter),
        Strategy::LeastConnections => least_connections(instances),
        Strategy::Random => &instances[rand::thread_rng().gen_range(0..instances.len())],
        Strategy::ConsistentHash => {
            match ctx
                .and_then(|ctx| ctx.hash_key.as_deref())
                .and_then(|key| modulo_index(key, instances.len()))
            {
                Some(index) => &instances[index],
                None => round_robin(instances, counter),
            }
        }
    };
    Some(picked.clone())
}

fn round_robin<'a>(instances: &'a [ServiceInstance], counter: &AtomicUsize) -> &'a ServiceInstance {
    let slot = counter.fetch_add(1, Ordering::Relaxed);
    &instances[slot % instances.len()]
}

/// Round robin over the list expanded by weight (`[A, B, B]` for weights
/// 1 and 2), walked without materialising the expansion
fn weighted_round_robin<'a>(
    instances: &'a [ServiceInstance],
    counter: &AtomicUsize,
) -> &'a ServiceInstance {
    let total: usize = instances.iter().map(|i| i.effective_weight() as usize).sum();
    let mut slot = counter.fetch_add(1, Ordering::Relaxed) % total;
    for instance in instances {
        let weight = instance.effective_weight() as usize;
        if slot < weight {
            return instance;
        }
        slot -= weight;
    }
    &instances[instances.len() - 1]
}

/// Minimum load score; ties go to the earlier instance
fn least_connections(instances: &[ServiceInstance]) -> &ServiceInstance {
    let mut best = &instances[0];
    for candidate in &instances[1..] {
        if candidate.load_score() < best.load_score() {
            best = candidate;
        }
    }
    best
}
