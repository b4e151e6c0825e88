//! Collector Configuration
//!
//! Configurable parameters for the peer statistics collector.
//! Defaults are deliberately conservative: polling too fast overwhelms the
//! discovery service and makes interactive views jumpy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Placeholder substituted with the peer IP in `geo_lookup_url`
pub const IP_PLACEHOLDER: &str = "{ip}";

/// Main configuration for the collector service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    // === Polling ===

    /// Period between poll cycles (seconds)
    pub poll_interval_secs: u64,

    /// Upper bound for a whole cycle: fetch, resolve, publish (seconds)
    pub cycle_timeout_secs: u64,

    // === Discovery ===

    /// Endpoint returning the list of connected peers as JSON
    pub discovery_url: String,

    /// Timeout for a single discovery fetch (seconds)
    pub discovery_timeout_secs: u64,

    // === Geo resolution ===

    /// Lookup URL template, `{ip}` is replaced with the peer address
    pub geo_lookup_url: String,

    /// Timeout for a single geo lookup (seconds)
    pub lookup_timeout_secs: u64,

    /// Maximum geo lookups in flight within one cycle
    pub max_concurrent_lookups: usize,

    /// Retention window for cached locations (seconds, 0 = keep forever)
    pub cache_ttl_secs: u64,

    /// Keep the geo cache on disk across restarts
    pub persistent_cache: bool,

    // === API ===

    /// Port for the HTTP API (0 disables it)
    pub api_port: u16,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            cycle_timeout_secs: 30,

            discovery_url: "http://127.0.0.1:5001/peers".to_string(),
            discovery_timeout_secs: 10,

            geo_lookup_url: "https://ipapi.co/{ip}/country/".to_string(),
            lookup_timeout_secs: 5,
            max_concurrent_lookups: 8,
            cache_ttl_secs: 7 * 24 * 60 * 60, // 1 week
            persistent_cache: true,

            api_port: 8080,
        }
    }
}

impl CollectorConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_poll_interval(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.poll_interval_secs = secs;
        }
        self
    }

    pub fn with_discovery_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.discovery_url = url;
        }
        self
    }

    pub fn with_geo_lookup_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.geo_lookup_url = url;
        }
        self
    }

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_memory_cache(mut self, memory_only: bool) -> Self {
        if memory_only {
            self.persistent_cache = false;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// `None` when cached entries never expire
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }

        if self.discovery_timeout_secs == 0 || self.lookup_timeout_secs == 0 {
            anyhow::bail!("discovery and lookup timeouts must be greater than zero");
        }

        if self.cycle_timeout_secs < self.discovery_timeout_secs {
            anyhow::bail!(
                "cycle_timeout_secs ({}) must not be less than discovery_timeout_secs ({})",
                self.cycle_timeout_secs,
                self.discovery_timeout_secs
            );
        }

        if self.lookup_timeout_secs >= self.cycle_timeout_secs {
            anyhow::bail!(
                "lookup_timeout_secs ({}) must be less than cycle_timeout_secs ({})",
                self.lookup_timeout_secs,
                self.cycle_timeout_secs
            );
        }

        if self.max_concurrent_lookups == 0 {
            anyhow::bail!("max_concurrent_lookups must be at least 1");
        }

        if self.discovery_url.trim().is_empty() {
            anyhow::bail!("discovery_url must not be empty");
        }

        if !self.geo_lookup_url.contains(IP_PLACEHOLDER) {
            anyhow::bail!(
                "geo_lookup_url ({}) must contain the {} placeholder",
                self.geo_lookup_url,
                IP_PLACEHOLDER
            );
        }

        Ok(())
    }
}
