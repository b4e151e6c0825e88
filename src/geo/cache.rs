//! Geo Cache
//!
//! Memoization store mapping IP address to country code.
//! Only successful resolutions are ever written here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::CountryCode;

/// Cache store consulted by the resolver before any network lookup
#[async_trait]
pub trait GeoCache: Send + Sync {
    /// Stored code for `ip`, or `None` when absent or expired
    async fn get(&self, ip: &str) -> Result<Option<CountryCode>, CacheError>;

    /// Store a resolved code for `ip`
    async fn set(&self, ip: &str, code: &str) -> Result<(), CacheError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Cache entry codec error: {0}")]
    Codec(String),
}

/// In-process cache with an optional retention window
pub struct MemoryGeoCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    ttl: Option<Duration>,
}

struct MemoryEntry {
    code: CountryCode,
    stored_at: Instant,
}

impl MemoryGeoCache {
    /// `ttl = None` keeps entries for the lifetime of the process
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    fn is_fresh(&self, entry: &MemoryEntry) -> bool {
        self.ttl.map_or(true, |ttl| entry.stored_at.elapsed() < ttl)
    }
}

#[async_trait]
impl GeoCache for MemoryGeoCache {
    async fn get(&self, ip: &str) -> Result<Option<CountryCode>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(ip)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.code.clone()))
    }

    async fn set(&self, ip: &str, code: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            ip.to_string(),
            MemoryEntry {
                code: code.to_string(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}
