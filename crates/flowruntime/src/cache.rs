//! Per-iteration snapshot cache.
//!
//! Entries live for a fixed TTL measured from creation. Eviction, either by
//! the sweeper or by an expired entry being refilled, calls [`Release`] on
//! the evicted snapshot exactly once, so image buffers held by snapshots are
//! freed regardless of how clients read them.

use crate::SharedGraph;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flowcore::{IterationId, Port, PortSnapshot, Release, Step, StepId, StepSnapshot};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Id of a cached entity: a step id or a port id
pub type EntityId = Uuid;

type CacheKey = (IterationId, EntityId);

#[derive(Clone)]
enum Snapshot {
    Step(Arc<StepSnapshot>),
    Port(Arc<PortSnapshot>),
}

impl Snapshot {
    fn release(&self) {
        match self {
            Snapshot::Step(s) => s.release(),
            Snapshot::Port(p) => p.release(),
        }
    }
}

struct CacheEntry {
    snapshot: Snapshot,
    expires_at: Instant,
}

pub struct IterationCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    shutdown: CancellationToken,
}

impl IterationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, iteration_id: IterationId, entity: EntityId) -> bool {
        let now = Instant::now();
        self.entries
            .get(&(iteration_id, entity))
            .map(|e| e.expires_at > now)
            .unwrap_or(false)
    }

    /// Pre-fills the cache for one iteration: one task per step, each writing
    /// the step snapshot and the snapshots of its cacheable ports.
    ///
    /// Returns the number of entries written.
    pub async fn create_cache(self: &Arc<Self>, iteration_id: IterationId, graph: &SharedGraph) -> usize {
        let step_ids: Vec<StepId> = graph.read().await.steps().map(|s| s.id()).collect();

        let mut tasks = FuturesUnordered::new();
        for step_id in step_ids {
            let cache = self.clone();
            let graph = graph.clone();
            tasks.push(tokio::spawn(async move {
                let graph = graph.read().await;
                let Some(step) = graph.step(step_id) else {
                    return 0;
                };
                cache.get_or_create_step_entry(iteration_id, step);
                let mut written = 1;
                for port in step.ports().iter().filter(|p| p.is_cacheable()) {
                    cache.get_or_create_port_entry(iteration_id, step_id, port);
                    written += 1;
                }
                written
            }));
        }

        let mut total = 0;
        while let Some(result) = tasks.next().await {
            match result {
                Ok(written) => total += written,
                Err(e) => tracing::error!("Cache fill task failed for iteration {}: {}", iteration_id, e),
            }
        }
        tracing::debug!("Cached {} entries for iteration {}", total, iteration_id);
        total
    }

    pub fn get_step_entry(&self, iteration_id: IterationId, step_id: StepId) -> Option<Arc<StepSnapshot>> {
        match self.lookup(&(iteration_id, step_id))? {
            Snapshot::Step(s) => Some(s),
            Snapshot::Port(_) => None,
        }
    }

    pub fn get_port_entry(&self, iteration_id: IterationId, port_id: EntityId) -> Option<Arc<PortSnapshot>> {
        match self.lookup(&(iteration_id, port_id))? {
            Snapshot::Port(p) => Some(p),
            Snapshot::Step(_) => None,
        }
    }

    /// Returns the cached step snapshot, materializing it if absent or expired.
    pub fn get_or_create_step_entry(&self, iteration_id: IterationId, step: &Step) -> Arc<StepSnapshot> {
        if let Some(snapshot) = self.get_step_entry(iteration_id, step.id()) {
            return snapshot;
        }
        let fresh = Snapshot::Step(Arc::new(StepSnapshot::capture(iteration_id, step)));
        match self.fill((iteration_id, step.id()), fresh) {
            Snapshot::Step(s) => s,
            Snapshot::Port(_) => Arc::new(StepSnapshot::capture(iteration_id, step)),
        }
    }

    /// Returns the cached port snapshot, materializing it if absent or expired.
    pub fn get_or_create_port_entry(&self, iteration_id: IterationId, step_id: StepId, port: &Port) -> Arc<PortSnapshot> {
        if let Some(snapshot) = self.get_port_entry(iteration_id, port.id()) {
            return snapshot;
        }
        let fresh = Snapshot::Port(Arc::new(PortSnapshot::capture(Some(iteration_id), step_id, port)));
        match self.fill((iteration_id, port.id()), fresh) {
            Snapshot::Port(p) => p,
            Snapshot::Step(_) => Arc::new(PortSnapshot::capture(Some(iteration_id), step_id, port)),
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Snapshot> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.snapshot.clone())
    }

    /// Writes `fresh` unless a live entry already holds the key; the value
    /// that ends up cached is returned. An expired occupant is released.
    fn fill(&self, key: CacheKey, fresh: Snapshot) -> Snapshot {
        let now = Instant::now();
        let entry = CacheEntry {
            snapshot: fresh.clone(),
            expires_at: now + self.ttl,
        };

        let (cached, stale) = match self.entries.entry(key) {
            Entry::Occupied(occupied) if occupied.get().expires_at > now => (occupied.get().snapshot.clone(), None),
            Entry::Occupied(mut occupied) => {
                let stale = std::mem::replace(occupied.get_mut(), entry);
                (fresh, Some(stale.snapshot))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                (fresh, None)
            }
        };

        if let Some(stale) = stale {
            stale.release();
        }
        cached
    }

    /// Evicts and releases every expired entry. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| *e.key())
            .collect();

        let mut evicted = 0;
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.expires_at <= now) {
                entry.snapshot.release();
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!("Swept {} expired cache entries", evicted);
        }
        evicted
    }

    /// Evicts and releases everything.
    pub fn clear(&self) {
        let keys: Vec<CacheKey> = self.entries.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.snapshot.release();
            }
        }
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// cache is dropped or [`shutdown`](Self::shutdown) is called.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.sweep_expired();
                    }
                }
            }
            tracing::debug!("Cache sweeper stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for IterationCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.clear();
    }
}
