// Accessors kept for API completeness are only exercised by tests
#![allow(dead_code)]

//! Peer Stats Collector
//!
//! Periodically asks the peer-discovery service which peers are connected,
//! locates each of them by IP address and republishes the enriched list.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PEER STATS                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Poll Timer (5s)          ──► one cycle at a time           │
//! │  Discovery Client         ←── GET connected peers           │
//! │  Geo Resolver             ←── cache first, lookup on miss   │
//! │  Geo Cache (RocksDB)      ←── IP → country, TTL retention   │
//! │  Snapshot Subscribers     ◄── full enriched peer list       │
//! │  HTTP API (8080)          ──► /peers, /status, /metrics     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod api;
mod collector;
mod config;
mod discovery;
mod geo;
mod types;

#[cfg(test)]
mod tests;

use api::{ApiState, Metrics};
use collector::{CycleSettings, StatsCollector, Subscription};
use config::CollectorConfig;
use discovery::HttpPeerDiscovery;
use geo::{GeoCache, GeoResolver, HttpGeoLookup, MemoryGeoCache, RocksGeoCache};

/// Peer Stats - connected peer statistics with geo enrichment
#[derive(Parser, Debug)]
#[command(name = "peer-stats")]
#[command(version)]
#[command(about = "Polls connected peers and enriches them with their country", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "peer-stats.toml")]
    config: PathBuf,

    /// Data directory for the persistent geo cache
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Seconds between poll cycles
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Discovery endpoint returning connected peers
    #[arg(long)]
    discovery_url: Option<String>,

    /// Geo lookup URL template containing {ip}
    #[arg(long)]
    geo_lookup_url: Option<String>,

    /// HTTP API port (0 disables the API)
    #[arg(long)]
    api_port: Option<u16>,

    /// Keep the geo cache in memory only
    #[arg(long)]
    memory_cache: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🌐 Peer Stats Collector v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        CollectorConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        CollectorConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_poll_interval(args.poll_interval)
        .with_discovery_url(args.discovery_url)
        .with_geo_lookup_url(args.geo_lookup_url)
        .with_api_port(args.api_port)
        .with_memory_cache(args.memory_cache);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Poll interval: {}s", config.poll_interval_secs);
    info!("   Discovery: {}", config.discovery_url);
    info!("   Geo lookup: {}", config.geo_lookup_url);
    info!("   Cache TTL: {}s", config.cache_ttl_secs);

    let metrics = Arc::new(Metrics::new());

    // Initialize geo cache
    let persistent_cache = if config.persistent_cache {
        tokio::fs::create_dir_all(&args.data_dir).await?;
        let path = args.data_dir.join("geo_cache");
        let cache = Arc::new(RocksGeoCache::open(&path, config.cache_ttl_secs)?);
        info!("📦 Geo cache opened at {:?}", path);
        Some(cache)
    } else {
        None
    };

    let cache: Arc<dyn GeoCache> = match &persistent_cache {
        Some(cache) => cache.clone() as Arc<dyn GeoCache>,
        None => {
            info!("📦 Using in-memory geo cache");
            Arc::new(MemoryGeoCache::new(config.cache_ttl()))
        }
    };

    let lookup = Arc::new(HttpGeoLookup::new(
        config.geo_lookup_url.clone(),
        config.lookup_timeout(),
    )?);
    let resolver = Arc::new(GeoResolver::new(
        lookup,
        cache,
        config.lookup_timeout(),
        metrics.clone(),
    ));

    let discovery = Arc::new(HttpPeerDiscovery::new(
        config.discovery_url.clone(),
        config.discovery_timeout(),
    )?);

    let collector = Arc::new(StatsCollector::start(
        discovery,
        resolver,
        CycleSettings::from_config(&config),
        metrics.clone(),
    ));

    tokio::spawn(log_snapshots(collector.subscribe()));

    let api_handle = if config.api_port != 0 {
        let state = Arc::new(ApiState {
            collector: collector.clone(),
            metrics: metrics.clone(),
        });
        Some(tokio::spawn(api::run_api_server(config.api_port, state)))
    } else {
        None
    };

    info!("✅ Collector started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    match api_handle {
        Some(api_handle) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("🛑 Shutdown signal received");
                }
                result = api_handle => {
                    error!("HTTP API exited: {:?}", result);
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("🛑 Shutdown signal received");
        }
    }

    collector.stop().await;

    // Graceful shutdown: flush geo cache
    if let Some(cache) = persistent_cache {
        cache.flush()?;
        info!("📦 Geo cache flushed to disk");
    }

    info!("👋 Peer Stats shutting down");
    Ok(())
}

/// Log a one-line summary of every published snapshot
async fn log_snapshots(mut subscription: Subscription) {
    while let Some(snapshot) = subscription.next().await {
        let countries = snapshot
            .country_counts()
            .iter()
            .map(|(code, count)| format!("{} {}", geo::country_flag_emoji(code), count))
            .collect::<Vec<_>>()
            .join(" ");

        info!(
            "📊 Snapshot #{}: {} peers, {} located {}",
            snapshot.sequence,
            snapshot.len(),
            snapshot.enriched_count(),
            countries
        );
    }
}
