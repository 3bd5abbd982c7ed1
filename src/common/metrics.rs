//! Coordination metrics
//!
//! Prometheus-compatible counters, gauges and a latency histogram for the
//! registry, the load balancer and the failover manager.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics for one process
#[derive(Debug)]
pub struct MetricsRegistry {
    // Registry
    pub instances_registered: Counter,
    pub instances_deregistered: Counter,
    pub instances_expired: Counter,
    pub probes_total: Counter,
    pub probe_failures: Counter,
    pub probe_latency: Histogram,
    pub store_errors: Counter,

    // Load balancer
    pub selections: Counter,
    pub empty_selections: Counter,

    // Failover
    pub elections_started: Counter,
    pub elections_completed: Counter,
    pub promotions: Counter,
    pub demotions: Counter,
    pub failovers: Counter,
    pub health_score: Gauge,
    pub is_primary: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            instances_registered: Counter::new(),
            instances_deregistered: Counter::new(),
            instances_expired: Counter::new(),
            probes_total: Counter::new(),
            probe_failures: Counter::new(),
            probe_latency: Histogram::new(),
            store_errors: Counter::new(),
            selections: Counter::new(),
            empty_selections: Counter::new(),
            elections_started: Counter::new(),
            elections_completed: Counter::new(),
            promotions: Counter::new(),
            demotions: Counter::new(),
            failovers: Counter::new(),
            health_score: Gauge::new(),
            is_primary: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one probe outcome
    pub fn record_probe(&self, latency: Duration, success: bool) {
        self.probes_total.inc();
        self.probe_latency.observe(latency.as_secs_f64() * 1000.0);
        if !success {
            self.probe_failures.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("instances_registered_total", "Instance registrations", &self.instances_registered),
            ("instances_deregistered_total", "Instance deregistrations", &self.instances_deregistered),
            ("instances_expired_total", "Instances purged for missing heartbeats", &self.instances_expired),
            ("probes_total", "Health probes issued", &self.probes_total),
            ("probe_failures_total", "Health probes that failed", &self.probe_failures),
            ("store_errors_total", "Coordination store errors", &self.store_errors),
            ("lb_selections_total", "Load-balancer selections", &self.selections),
            ("lb_empty_selections_total", "Selections with no healthy instance", &self.empty_selections),
            ("elections_started_total", "Elections started by this node", &self.elections_started),
            ("elections_completed_total", "Elections that promoted a winner", &self.elections_completed),
            ("promotions_total", "Promotions of this node to primary", &self.promotions),
            ("demotions_total", "Demotions of this node from primary", &self.demotions),
            ("failovers_total", "Failovers executed by this node", &self.failovers),
        ];
        for (name, help, counter) in counters {
            write_metric(&mut out, name, help, "counter", counter.get());
        }

        write_metric(
            &mut out,
            "health_score",
            "Local node health score (0-100)",
            "gauge",
            self.health_score.get(),
        );
        write_metric(
            &mut out,
            "is_primary",
            "1 when this node is the active primary",
            "gauge",
            self.is_primary.get(),
        );
        write_metric(
            &mut out,
            "uptime_seconds",
            "Process uptime in seconds",
            "gauge",
            self.uptime_seconds(),
        );

        out.push_str("# HELP fleetcoord_probe_duration_ms Health probe duration in milliseconds\n");
        out.push_str("# TYPE fleetcoord_probe_duration_ms histogram\n");
        for (le, count) in self.probe_latency.get_buckets() {
            let le = if le.is_infinite() {
                "+Inf".to_string()
            } else {
                le.to_string()
            };
            let _ = writeln!(out, "fleetcoord_probe_duration_ms_bucket{{le=\"{}\"}} {}", le, count);
        }
        let _ = writeln!(out, "fleetcoord_probe_duration_ms_sum {}", self.probe_latency.sum());
        let _ = writeln!(out, "fleetcoord_probe_duration_ms_count {}", self.probe_latency.count());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP fleetcoord_{} {}", name, help);
    let _ = writeln!(out, "# TYPE fleetcoord_{} {}", name, kind);
    let _ = writeln!(out, "fleetcoord_{} {}", name, value);
}

/// Process-wide metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(9000.0);

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        let (le, total) = buckets[buckets.len() - 1];
        assert!(le.is_infinite());
        assert_eq!(total, 3);
        // 9000ms lands only in +Inf
        assert_eq!(buckets[buckets.len() - 2].1, 2);
    }

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new();
        gauge.set(87);
        assert_eq!(gauge.get(), 87);
    }

    #[test]
    fn test_record_probe() {
        let registry = MetricsRegistry::new();
        registry.record_probe(Duration::from_millis(12), true);
        registry.record_probe(Duration::from_millis(3000), false);

        assert_eq!(registry.probes_total.get(), 2);
        assert_eq!(registry.probe_failures.get(), 1);
        assert_eq!(registry.probe_latency.count(), 2);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.failovers.inc();
        registry.is_primary.set(1);

        let text = registry.to_prometheus();
        assert!(text.contains("# TYPE fleetcoord_failovers_total counter"));
        assert!(text.contains("fleetcoord_failovers_total 1"));
        assert!(text.contains("fleetcoord_is_primary 1"));
        assert!(text.contains("fleetcoord_probe_duration_ms_bucket{le=\"+Inf\"} 0"));
    }
}
