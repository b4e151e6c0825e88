// Test support: hand-written fakes for the collector's external services

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::Metrics;
use crate::collector::{CycleSettings, StatsCollector};
use crate::discovery::{DiscoveryError, PeerDiscovery};
use crate::geo::{CacheError, GeoCache, GeoLookup, GeoResolver, MemoryGeoCache, ResolutionError};
use crate::types::{CountryCode, PeerRecord};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn peer(id: &str, ip: Option<&str>) -> PeerRecord {
    PeerRecord::new(id, ip)
}

pub fn test_settings() -> CycleSettings {
    CycleSettings {
        poll_interval: POLL_INTERVAL,
        discovery_timeout: Duration::from_secs(10),
        cycle_timeout: Duration::from_secs(30),
        max_concurrent_lookups: 4,
    }
}

/// Collector over an in-memory cache with test settings
pub fn collector_with(
    discovery: Arc<FakeDiscovery>,
    lookup: Arc<ScriptedLookup>,
) -> (StatsCollector, Arc<Metrics>) {
    collector_with_cache(discovery, lookup, Arc::new(MemoryGeoCache::new(None)))
}

pub fn collector_with_cache(
    discovery: Arc<FakeDiscovery>,
    lookup: Arc<ScriptedLookup>,
    cache: Arc<dyn GeoCache>,
) -> (StatsCollector, Arc<Metrics>) {
    collector_with_settings(discovery, lookup, cache, test_settings())
}

pub fn collector_with_settings(
    discovery: Arc<FakeDiscovery>,
    lookup: Arc<ScriptedLookup>,
    cache: Arc<dyn GeoCache>,
    settings: CycleSettings,
) -> (StatsCollector, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let resolver = Arc::new(GeoResolver::new(
        lookup,
        cache,
        Duration::from_secs(5),
        metrics.clone(),
    ));
    let collector = StatsCollector::start(discovery, resolver, settings, metrics.clone());
    (collector, metrics)
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Discovery answering from a script, then from a fixed fallback list
pub struct FakeDiscovery {
    script: Mutex<VecDeque<Result<Vec<PeerRecord>, String>>>,
    fallback: Vec<PeerRecord>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDiscovery {
    pub fn always(peers: Vec<PeerRecord>) -> Self {
        Self::scripted(vec![], peers)
    }

    /// `Err(msg)` entries fail that call with a transport error
    pub fn scripted(script: Vec<Result<Vec<PeerRecord>, &str>>, fallback: Vec<PeerRecord>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map_err(str::to_string))
                    .collect(),
            ),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerDiscovery for FakeDiscovery {
    async fn list_peers(&self) -> Result<Vec<PeerRecord>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match next {
            Some(Ok(peers)) => Ok(peers),
            Some(Err(msg)) => Err(DiscoveryError::Transport(msg)),
            None => Ok(self.fallback.clone()),
        }
    }
}

// =============================================================================
// GEO LOOKUP
// =============================================================================

/// Lookup answering per IP from a queue; the last answer repeats
pub struct ScriptedLookup {
    answers: Mutex<HashMap<String, VecDeque<Result<CountryCode, String>>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    pub fn answer(self, ip: &str, code: &str) -> Self {
        self.push(ip, Ok(code.to_string()))
    }

    pub fn fail(self, ip: &str, reason: &str) -> Self {
        self.push(ip, Err(reason.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, ip: &str, answer: Result<CountryCode, String>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .entry(ip.to_string())
            .or_default()
            .push_back(answer);
        self
    }

    pub fn calls(&self, ip: &str) -> usize {
        self.calls.lock().unwrap().get(ip).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl GeoLookup for ScriptedLookup {
    async fn lookup_country(&self, ip: &str) -> Result<CountryCode, ResolutionError> {
        *self.calls.lock().unwrap().entry(ip.to_string()).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let answer = {
            let mut answers = self.answers.lock().unwrap();
            match answers.get_mut(ip) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match answer {
            Some(Ok(code)) => Ok(code),
            Some(Err(reason)) => Err(ResolutionError::Transport(reason)),
            None => Err(ResolutionError::Status(404)),
        }
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Cache store whose every operation fails
pub struct FailingCache;

#[async_trait]
impl GeoCache for FailingCache {
    async fn get(&self, _ip: &str) -> Result<Option<CountryCode>, CacheError> {
        Err(CacheError::Storage("store unavailable".to_string()))
    }

    async fn set(&self, _ip: &str, _code: &str) -> Result<(), CacheError> {
        Err(CacheError::Storage("store unavailable".to_string()))
    }
}
