//! Stats Collector Module
//!
//! Owns the polling loop: on every tick it fetches the connected peers,
//! resolves their locations and publishes one immutable snapshot.
//!
//! ## Guarantees
//!
//! - Cycles never overlap: one task runs them back to back, late ticks are
//!   skipped rather than queued
//! - A snapshot is published only after every lookup of its cycle settled
//! - Subscribers only ever see complete snapshots, newest first; a slow
//!   subscriber skips intermediate ones instead of buffering them
//! - After `stop()` returns, no discovery, lookup, cache or snapshot
//!   activity happens

mod cycle;

pub use cycle::{enrich_peers, run_cycle, CycleError, CycleSettings, PeerOutcome};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::Metrics;
use crate::discovery::PeerDiscovery;
use crate::geo::GeoResolver;
use crate::types::{EnrichedPeerRecord, Snapshot};

/// Handle identifying a subscription
pub type SubscriptionId = u64;

/// Where the poll loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Waiting for the next tick
    Idle,

    /// A cycle is running
    Polling,

    /// `stop()` was called, the loop is gone
    Stopped,
}

/// Point-in-time view of the collector
#[derive(Debug, Clone)]
pub struct CollectorStatus {
    pub state: CollectorState,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_sequence: u64,
    pub last_error: Option<String>,
    pub subscribers: usize,
}

/// Receiving end of a snapshot subscription
pub struct Subscription {
    id: SubscriptionId,
    rx: watch::Receiver<Option<Arc<Snapshot>>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next published snapshot
    ///
    /// Returns `None` once unsubscribed or once the collector stopped.
    pub async fn next(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

/// State shared between the collector handle and its polling task
struct Shared {
    latest: watch::Sender<Arc<Snapshot>>,
    subscribers: Mutex<HashMap<SubscriptionId, watch::Sender<Option<Arc<Snapshot>>>>>,
    next_subscription: AtomicU64,
    state: Mutex<CollectorState>,
    last_error: Mutex<Option<String>>,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn new(metrics: Arc<Metrics>) -> Self {
        let (latest, _) = watch::channel(Arc::new(Snapshot::empty()));

        Self {
            latest,
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            state: Mutex::new(CollectorState::Idle),
            last_error: Mutex::new(None),
            metrics,
        }
    }

    fn set_state(&self, state: CollectorState) {
        *lock(&self.state) = state;
    }

    /// Replace the latest snapshot and push it to every subscriber
    fn publish(&self, peers: Vec<EnrichedPeerRecord>) -> Arc<Snapshot> {
        let sequence = self.latest.borrow().sequence + 1;
        let snapshot = Arc::new(Snapshot::new(sequence, peers));

        self.latest.send_replace(snapshot.clone());

        // Dropped subscriptions are pruned here
        lock(&self.subscribers).retain(|_, tx| {
            tx.send_replace(Some(snapshot.clone()));
            !tx.is_closed()
        });

        self.metrics.inc_cycles_completed();
        self.metrics.set_snapshot(
            sequence,
            snapshot.len() as u64,
            snapshot.enriched_count() as u64,
        );
        *lock(&self.last_error) = None;

        snapshot
    }

    fn record_failure(&self, error: &CycleError) {
        self.metrics.inc_cycles_failed();
        if let CycleError::Discovery(_) = error {
            self.metrics.inc_discovery_failures();
        }
        *lock(&self.last_error) = Some(error.to_string());
    }
}

/// Periodic peer statistics collector
pub struct StatsCollector {
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StatsCollector {
    /// Spawn the polling loop; the first cycle starts immediately
    pub fn start(
        discovery: Arc<dyn PeerDiscovery>,
        resolver: Arc<GeoResolver>,
        settings: CycleSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let shared = Arc::new(Shared::new(metrics));

        info!(
            "📡 Starting peer stats collector (every {:?}, up to {} concurrent lookups)",
            settings.poll_interval, settings.max_concurrent_lookups
        );

        let task = tokio::spawn(run_polling_loop(
            shared.clone(),
            discovery,
            resolver,
            settings,
        ));

        Self {
            shared,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Register for snapshot updates
    ///
    /// Only snapshots completed after this call are delivered.
    pub fn subscribe(&self) -> Subscription {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);

        // A stopped collector hands out already-closed subscriptions
        let mut subscribers = lock(&self.shared.subscribers);
        if self.state() != CollectorState::Stopped {
            subscribers.insert(id, tx);
            debug!("Subscription {} registered", id);
        }
        drop(subscribers);

        Subscription { id, rx }
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.shared.subscribers).remove(&id).is_some();
        if removed {
            debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Last published snapshot, empty before the first successful cycle
    pub fn latest_snapshot(&self) -> Arc<Snapshot> {
        self.shared.latest.borrow().clone()
    }

    pub fn state(&self) -> CollectorState {
        *lock(&self.shared.state)
    }

    pub fn status(&self) -> CollectorStatus {
        let metrics = self.shared.metrics.snapshot();

        CollectorStatus {
            state: self.state(),
            cycles_completed: metrics.cycles_completed,
            cycles_failed: metrics.cycles_failed,
            last_sequence: self.shared.latest.borrow().sequence,
            last_error: lock(&self.shared.last_error).clone(),
            subscribers: lock(&self.shared.subscribers).len(),
        }
    }

    /// Stop polling
    ///
    /// Cancels the timer and any in-flight cycle, then waits for the task
    /// to be gone. Safe to call more than once.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;

        let Some(handle) = task.take() else {
            return;
        };

        handle.abort();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!("Polling task ended abnormally: {}", e);
            }
        }

        self.shared.set_state(CollectorState::Stopped);

        // Closing the senders ends every pending `Subscription::next`
        lock(&self.shared.subscribers).clear();

        info!("🛑 Peer stats collector stopped");
    }
}

impl Drop for StatsCollector {
    fn drop(&mut self) {
        // Never leave the timer running past the collector
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// The poll loop: one cycle per tick, never two at once
async fn run_polling_loop(
    shared: Arc<Shared>,
    discovery: Arc<dyn PeerDiscovery>,
    resolver: Arc<GeoResolver>,
    settings: CycleSettings,
) {
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        shared.set_state(CollectorState::Polling);

        match run_cycle(discovery.as_ref(), &resolver, &settings, &shared.metrics).await {
            Ok(peers) => {
                let snapshot = shared.publish(peers);
                debug!(
                    "Snapshot #{}: {} peers, {} located",
                    snapshot.sequence,
                    snapshot.len(),
                    snapshot.enriched_count()
                );
            }
            Err(e) => {
                warn!("Poll cycle failed, keeping previous snapshot: {}", e);
                shared.record_failure(&e);
            }
        }

        shared.set_state(CollectorState::Idle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
