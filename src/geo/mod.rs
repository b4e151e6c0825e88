//! Geo Resolver Module
//!
//! Maps a peer IP address to an ISO country code. The cache is consulted
//! first; only a miss reaches the lookup service.
//!
//! ## Caching contract
//!
//! - Hits return the stored code without I/O
//! - Successful lookups are stored before being returned
//! - Failed lookups store nothing, so the next poll retries them
//! - Concurrent misses for the same IP may each hit the network; every
//!   writer stores the same value so the last write wins

pub mod cache;
pub mod lookup;
mod storage;

pub use cache::{CacheError, GeoCache, MemoryGeoCache};
pub use lookup::{GeoLookup, HttpGeoLookup};
pub use storage::RocksGeoCache;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::Metrics;
use crate::types::CountryCode;

/// Regional indicator symbol for 'A'
const REGIONAL_INDICATOR_A: u32 = 0x1F1E6;

/// Resolves IP addresses to country codes through a cache
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    cache: Arc<dyn GeoCache>,
    lookup_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl GeoResolver {
    pub fn new(
        lookup: Arc<dyn GeoLookup>,
        cache: Arc<dyn GeoCache>,
        lookup_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            lookup,
            cache,
            lookup_timeout,
            metrics,
        }
    }

    /// Resolve an IP address to its country code
    pub async fn resolve(&self, ip: &str) -> Result<CountryCode, ResolutionError> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(ResolutionError::InvalidIp(ip.to_string()));
        }

        // A broken cache degrades to a miss, never to a failed resolution
        match self.cache.get(ip).await {
            Ok(Some(code)) => {
                self.metrics.inc_cache_hits();
                debug!("Geo cache hit for {}: {}", ip, code);
                return Ok(code);
            }
            Ok(None) => {}
            Err(e) => warn!("Geo cache read failed for {}: {}", ip, e),
        }

        self.metrics.inc_geo_lookups();

        let raw = tokio::time::timeout(self.lookup_timeout, self.lookup.lookup_country(ip))
            .await
            .map_err(|_| ResolutionError::Timeout(self.lookup_timeout))??;

        let code = normalize_country_code(&raw)?;

        if let Err(e) = self.cache.set(ip, &code).await {
            warn!("Failed to cache location of {}: {}", ip, e);
        }

        debug!("Resolved {} to {}", ip, code);
        Ok(code)
    }
}

/// Normalize a lookup answer into an upper-case alpha-2 code
pub fn normalize_country_code(raw: &str) -> Result<CountryCode, ResolutionError> {
    let code = raw.trim().to_ascii_uppercase();

    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ResolutionError::InvalidResponse(raw.trim().to_string()));
    }

    Ok(code)
}

/// Flag emoji for an ISO country code
///
/// Each letter maps to its regional indicator symbol; non-letters are dropped.
pub fn country_flag_emoji(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .filter_map(|c| {
            let offset = c.to_ascii_uppercase() as u32 - 'A' as u32;
            char::from_u32(REGIONAL_INDICATOR_A + offset)
        })
        .collect()
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Invalid IP address: {0:?}")]
    InvalidIp(String),

    #[error("Geo lookup transport error: {0}")]
    Transport(String),

    #[error("Geo lookup returned HTTP {0}")]
    Status(u16),

    #[error("Geo lookup returned an invalid country code: {0:?}")]
    InvalidResponse(String),

    #[error("Geo lookup timed out after {0:?}")]
    Timeout(Duration),
}
