//! One poll cycle: fetch, enrich, assemble
//!
//! A discovery failure aborts the cycle. A resolution failure only affects
//! the peer it belongs to; that peer is kept, without geo fields.

use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::Metrics;
use crate::config::CollectorConfig;
use crate::discovery::{DiscoveryError, PeerDiscovery};
use crate::geo::{GeoResolver, ResolutionError};
use crate::types::{CountryCode, EnrichedPeerRecord, PeerRecord};

/// Timing and fan-out limits for a cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub poll_interval: Duration,
    pub discovery_timeout: Duration,
    pub cycle_timeout: Duration,
    pub max_concurrent_lookups: usize,
}

impl CycleSettings {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            discovery_timeout: config.discovery_timeout(),
            cycle_timeout: config.cycle_timeout(),
            max_concurrent_lookups: config.max_concurrent_lookups,
        }
    }
}

/// Result of enriching a single peer
#[derive(Debug)]
pub enum PeerOutcome {
    /// Peer has no IP, nothing to resolve
    Unaddressed,

    Resolved(CountryCode),

    Failed(ResolutionError),
}

/// Why a cycle produced no snapshot
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Cycle exceeded {0:?}")]
    Timeout(Duration),
}

/// Run one full cycle, bounded by the cycle timeout
///
/// Only discovery can make a cycle fail. Once the peer list is in, the
/// cycle always produces a snapshot: peers still resolving when the
/// deadline passes are kept without geo fields.
pub async fn run_cycle(
    discovery: &dyn PeerDiscovery,
    resolver: &GeoResolver,
    settings: &CycleSettings,
    metrics: &Metrics,
) -> Result<Vec<EnrichedPeerRecord>, CycleError> {
    let deadline = Instant::now() + settings.cycle_timeout;

    let peers = tokio::time::timeout_at(deadline, fetch_peers(discovery, settings.discovery_timeout))
        .await
        .map_err(|_| CycleError::Timeout(settings.cycle_timeout))??;

    Ok(enrich_peers(resolver, peers, settings.max_concurrent_lookups, deadline, metrics).await)
}

async fn fetch_peers(
    discovery: &dyn PeerDiscovery,
    timeout: Duration,
) -> Result<Vec<PeerRecord>, DiscoveryError> {
    tokio::time::timeout(timeout, discovery.list_peers())
        .await
        .map_err(|_| DiscoveryError::Timeout(timeout))?
}

/// Resolve every addressed peer, preserving discovery order
///
/// Resolutions run concurrently up to `max_concurrent`. A resolution
/// unsettled at `deadline` counts as a timeout for that peer alone.
pub async fn enrich_peers(
    resolver: &GeoResolver,
    peers: Vec<PeerRecord>,
    max_concurrent: usize,
    deadline: Instant,
    metrics: &Metrics,
) -> Vec<EnrichedPeerRecord> {
    let budget = deadline.saturating_duration_since(Instant::now());

    let settled = stream::iter(peers)
        .map(|peer| async move {
            let outcome = tokio::time::timeout_at(deadline, resolve_peer(resolver, &peer))
                .await
                .unwrap_or_else(|_| PeerOutcome::Failed(ResolutionError::Timeout(budget)));
            (peer, outcome)
        })
        .buffered(max_concurrent.max(1))
        .collect::<Vec<_>>()
        .await;

    // Counted only once the whole batch settled
    settled
        .into_iter()
        .map(|(peer, outcome)| apply_outcome(peer, outcome, metrics))
        .collect()
}

async fn resolve_peer(resolver: &GeoResolver, peer: &PeerRecord) -> PeerOutcome {
    match peer.resolvable_ip() {
        None => PeerOutcome::Unaddressed,
        Some(ip) => match resolver.resolve(ip).await {
            Ok(code) => PeerOutcome::Resolved(code),
            Err(e) => PeerOutcome::Failed(e),
        },
    }
}

fn apply_outcome(peer: PeerRecord, outcome: PeerOutcome, metrics: &Metrics) -> EnrichedPeerRecord {
    match outcome {
        PeerOutcome::Unaddressed => EnrichedPeerRecord::unenriched(peer),
        PeerOutcome::Resolved(code) => {
            debug!("Peer {} located in {}", peer.peer_id, code);
            EnrichedPeerRecord::with_country(peer, code)
        }
        PeerOutcome::Failed(e) => {
            metrics.inc_resolution_failures();
            warn!(
                "Could not locate peer {} ({}): {}",
                peer.peer_id,
                peer.ip.as_deref().unwrap_or_default(),
                e
            );
            EnrichedPeerRecord::unenriched(peer)
        }
    }
}
