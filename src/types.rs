//! Core types for peer statistics
//!
//! Raw peer records as reported by the discovery service, their
//! geo-enriched counterparts, and the snapshot published once per poll cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::geo::country_flag_emoji;

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// Opaque peer identifier as reported by the discovery service
pub type PeerId = String;

/// ISO 3166-1 alpha-2 country code (always upper-case)
pub type CountryCode = String;

// =============================================================================
// PEER RECORDS
// =============================================================================

/// Raw peer record as received from the discovery service
///
/// Everything except the identifier and the IP address is transport
/// metadata this crate does not interpret. It is kept verbatim so that
/// consumers of a snapshot see exactly what discovery reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// Unique per connected peer
    #[serde(alias = "peer_id")]
    pub peer_id: PeerId,

    /// Remote IP address, absent for peers without a resolvable address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Remaining transport metadata (latency, multiaddr, streams, ...)
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PeerRecord {
    /// Create a record with no extra metadata
    pub fn new(peer_id: impl Into<PeerId>, ip: Option<&str>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ip: ip.map(str::to_string),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata field
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// IP address usable for geo resolution
    ///
    /// Blank strings count as absent.
    pub fn resolvable_ip(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// Peer record plus the geo fields derived from its IP address
///
/// The flag emoji is present iff the country code is present. Fields are
/// private so the only way to build one is through the two constructors,
/// which both keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPeerRecord {
    #[serde(flatten)]
    peer: PeerRecord,

    #[serde(skip_serializing_if = "Option::is_none")]
    iso_country_code: Option<CountryCode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    country_flag_emoji: Option<String>,
}

/// Geo keys owned by the enriched record, never taken from discovery
const GEO_KEYS: [&str; 2] = ["isoCountryCode", "countryFlagEmoji"];

fn without_geo_keys(mut peer: PeerRecord) -> PeerRecord {
    for key in GEO_KEYS {
        peer.metadata.remove(key);
    }
    peer
}

impl EnrichedPeerRecord {
    /// Pass a record through without geo fields
    pub fn unenriched(peer: PeerRecord) -> Self {
        Self {
            peer: without_geo_keys(peer),
            iso_country_code: None,
            country_flag_emoji: None,
        }
    }

    /// Attach a resolved country code and its flag
    pub fn with_country(peer: PeerRecord, code: CountryCode) -> Self {
        let flag = country_flag_emoji(&code);
        Self {
            peer: without_geo_keys(peer),
            iso_country_code: Some(code),
            country_flag_emoji: Some(flag),
        }
    }

    pub fn peer(&self) -> &PeerRecord {
        &self.peer
    }

    pub fn peer_id(&self) -> &str {
        &self.peer.peer_id
    }

    pub fn iso_country_code(&self) -> Option<&str> {
        self.iso_country_code.as_deref()
    }

    pub fn country_flag_emoji(&self) -> Option<&str> {
        self.country_flag_emoji.as_deref()
    }

    pub fn is_enriched(&self) -> bool {
        self.iso_country_code.is_some()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One complete enriched peer list produced by a single poll cycle
///
/// Published behind an `Arc` and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Publication order, starting at 1. Zero marks the empty placeholder.
    pub sequence: u64,

    /// When the producing cycle completed
    pub generated_at: Option<DateTime<Utc>>,

    /// Peers in discovery order
    pub peers: Vec<EnrichedPeerRecord>,
}

impl Snapshot {
    /// Placeholder returned before the first successful cycle
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            generated_at: None,
            peers: Vec::new(),
        }
    }

    pub fn new(sequence: u64, peers: Vec<EnrichedPeerRecord>) -> Self {
        Self {
            sequence,
            generated_at: Some(Utc::now()),
            peers,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of peers carrying geo fields
    pub fn enriched_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_enriched()).count()
    }

    /// Peers per country code, sorted by code
    pub fn country_counts(&self) -> BTreeMap<CountryCode, usize> {
        let mut counts = BTreeMap::new();
        for code in self.peers.iter().filter_map(|p| p.iso_country_code()) {
            *counts.entry(code.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn get(&self, peer_id: &str) -> Option<&EnrichedPeerRecord> {
        self.peers.iter().find(|p| p.peer_id() == peer_id)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}
