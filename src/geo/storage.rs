//! Persistent Geo Cache (RocksDB)
//!
//! Keeps resolved locations across restarts so a freshly started collector
//! does not re-resolve every known peer against the lookup service.

use async_trait::async_trait;
use rocksdb::{IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::cache::{CacheError, GeoCache};
use crate::types::CountryCode;

/// Key prefix for location entries
const PREFIX_GEO: &[u8] = b"geo:";

/// Stored value for one IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLocation {
    code: CountryCode,

    /// Unix timestamp (seconds) of the successful lookup
    stored_at: u64,
}

/// Geo cache backed by RocksDB
pub struct RocksGeoCache {
    db: DB,

    /// Retention window in seconds (0 = keep forever)
    ttl_secs: u64,
}

impl RocksGeoCache {
    /// Open or create a cache at the given path
    pub fn open(path: &Path, ttl_secs: u64) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path)?;
        let cache = Self { db, ttl_secs };

        let removed = cache.purge_expired()?;
        info!(
            "📦 Geo cache opened with {} locations ({} expired removed)",
            cache.entry_count(),
            removed
        );

        Ok(cache)
    }

    /// Number of stored locations, expired or not
    pub fn entry_count(&self) -> usize {
        self.db
            .prefix_iterator(PREFIX_GEO)
            .filter_map(Result::ok)
            .take_while(|(key, _)| key.starts_with(PREFIX_GEO))
            .count()
    }

    /// Remove expired entries, returning how many were removed
    pub fn purge_expired(&self) -> anyhow::Result<usize> {
        if self.ttl_secs == 0 {
            return Ok(0);
        }

        let now = current_timestamp();
        let mut removed = 0;

        let iter = self.db.iterator(IteratorMode::From(PREFIX_GEO, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(PREFIX_GEO) {
                break;
            }

            // Undecodable entries are dropped along with stale ones
            let stale = bincode::deserialize::<StoredLocation>(&value)
                .map(|entry| self.is_expired(&entry, now))
                .unwrap_or(true);

            if stale {
                self.db.delete(&key)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Flush all changes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn lookup_at(&self, ip: &str, now: u64) -> Result<Option<CountryCode>, CacheError> {
        let value = self
            .db
            .get(geo_key(ip))
            .map_err(|e| CacheError::Storage(e.to_string()))?;

        let Some(value) = value else {
            return Ok(None);
        };

        let entry: StoredLocation =
            bincode::deserialize(&value).map_err(|e| CacheError::Codec(e.to_string()))?;

        if self.is_expired(&entry, now) {
            debug!("Cached location of {} expired", ip);
            return Ok(None);
        }

        Ok(Some(entry.code))
    }

    fn store_at(&self, ip: &str, code: &str, now: u64) -> Result<(), CacheError> {
        let entry = StoredLocation {
            code: code.to_string(),
            stored_at: now,
        };
        let value = bincode::serialize(&entry).map_err(|e| CacheError::Codec(e.to_string()))?;

        self.db
            .put(geo_key(ip), value)
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    fn is_expired(&self, entry: &StoredLocation, now: u64) -> bool {
        self.ttl_secs > 0 && now.saturating_sub(entry.stored_at) >= self.ttl_secs
    }
}

#[async_trait]
impl GeoCache for RocksGeoCache {
    async fn get(&self, ip: &str) -> Result<Option<CountryCode>, CacheError> {
        self.lookup_at(ip, current_timestamp())
    }

    async fn set(&self, ip: &str, code: &str) -> Result<(), CacheError> {
        self.store_at(ip, code, current_timestamp())
    }
}

/// Create storage key for an IP address
fn geo_key(ip: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_GEO.len() + ip.len());
    key.extend_from_slice(PREFIX_GEO);
    key.extend_from_slice(ip.as_bytes());
    key
}

/// Get current Unix timestamp
fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
