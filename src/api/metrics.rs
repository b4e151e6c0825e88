//! Metrics Collection
//!
//! Counters for the poll loop and the geo resolver, exposed by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the peer statistics service
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Cycles that published a snapshot
    pub cycles_completed: AtomicU64,

    /// Cycles aborted by a discovery failure or timeout
    pub cycles_failed: AtomicU64,

    /// Discovery fetches that failed
    pub discovery_failures: AtomicU64,

    /// Geo lookups that reached the network
    pub geo_lookups: AtomicU64,

    /// Resolutions served from cache
    pub geo_cache_hits: AtomicU64,

    /// Per-peer resolution failures
    pub resolution_failures: AtomicU64,

    /// Peers in the latest snapshot
    pub snapshot_peers: AtomicU64,

    /// Peers with geo fields in the latest snapshot
    pub snapshot_enriched: AtomicU64,

    /// Sequence number of the latest snapshot
    pub snapshot_sequence: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub discovery_failures: u64,
    pub geo_lookups: u64,
    pub geo_cache_hits: u64,
    pub resolution_failures: u64,
    pub snapshot_peers: u64,
    pub snapshot_enriched: u64,
    pub snapshot_sequence: u64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_cycles_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycles_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discovery_failures(&self) {
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_geo_lookups(&self) {
        self.geo_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.geo_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolution_failures(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the shape of a freshly published snapshot
    pub fn set_snapshot(&self, sequence: u64, peers: u64, enriched: u64) {
        self.snapshot_sequence.store(sequence, Ordering::Relaxed);
        self.snapshot_peers.store(peers, Ordering::Relaxed);
        self.snapshot_enriched.store(enriched, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            geo_lookups: self.geo_lookups.load(Ordering::Relaxed),
            geo_cache_hits: self.geo_cache_hits.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            snapshot_peers: self.snapshot_peers.load(Ordering::Relaxed),
            snapshot_enriched: self.snapshot_enriched.load(Ordering::Relaxed),
            snapshot_sequence: self.snapshot_sequence.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let m = self.snapshot();
        let series: [(&str, &str, &str, u64); 10] = [
            ("uptime_seconds", "gauge", "Collector uptime in seconds", self.uptime_secs()),
            ("cycles_completed_total", "counter", "Poll cycles that published a snapshot", m.cycles_completed),
            ("cycles_failed_total", "counter", "Poll cycles aborted before publishing", m.cycles_failed),
            ("discovery_failures_total", "counter", "Failed discovery fetches", m.discovery_failures),
            ("geo_lookups_total", "counter", "Geo lookups sent to the network", m.geo_lookups),
            ("geo_cache_hits_total", "counter", "Geo resolutions served from cache", m.geo_cache_hits),
            ("resolution_failures_total", "counter", "Failed per-peer geo resolutions", m.resolution_failures),
            ("snapshot_peers", "gauge", "Peers in the latest snapshot", m.snapshot_peers),
            ("snapshot_enriched_peers", "gauge", "Located peers in the latest snapshot", m.snapshot_enriched),
            ("snapshot_sequence", "gauge", "Sequence number of the latest snapshot", m.snapshot_sequence),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in series {
            output.push_str(&format!(
                "# HELP peer_stats_{name} {help}\n\
                 # TYPE peer_stats_{name} {kind}\n\
                 peer_stats_{name} {value}\n\n"
            ));
        }
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let m = self.snapshot();
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "cycles": {
                "completed": m.cycles_completed,
                "failed": m.cycles_failed,
                "discovery_failures": m.discovery_failures,
            },
            "geo": {
                "lookups": m.geo_lookups,
                "cache_hits": m.geo_cache_hits,
                "resolution_failures": m.resolution_failures,
            },
            "snapshot": {
                "sequence": m.snapshot_sequence,
                "peers": m.snapshot_peers,
                "enriched": m.snapshot_enriched,
            },
        })
    }
}
