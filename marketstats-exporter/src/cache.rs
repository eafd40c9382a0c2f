//! TTL cache in front of the upstream client.
//!
//! Each [`DataSource`] gets its own slot guarded by an async mutex, so
//! concurrent scrapes that find a missing or expired entry wait for a single
//! upstream fetch instead of issuing one each. The outer map lock is only
//! held while looking a slot up, never across a fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::source::DataSource;
use crate::upstream::{Fetcher, UpstreamError};

/// A decoded payload together with the time it was captured.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub payload: Arc<Value>,
    pub captured_at: SystemTime,
    fetched: Instant,
}

impl CachedResponse {
    fn new(payload: Value) -> Self {
        Self {
            payload: Arc::new(payload),
            captured_at: SystemTime::now(),
            fetched: Instant::now(),
        }
    }

    /// Capture time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched.elapsed() < ttl
    }
}

type Cell = Arc<tokio::sync::Mutex<Option<CachedResponse>>>;

struct Slot {
    cell: Cell,
    last_used: u64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<DataSource, Slot>,
    tick: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry.
    pub hits: u64,
    /// Lookups that went upstream.
    pub misses: u64,
    /// Upstream fetches that failed and were not stored.
    pub failures: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

/// Time-bounded memoization of upstream fetches, keyed by source.
pub struct ResponseCache {
    fetcher: Arc<dyn Fetcher>,
    ttl: Duration,
    capacity: usize,
    slots: Mutex<Slots>,
    stats: RwLock<CacheStats>,
}

impl ResponseCache {
    /// Create a cache that reuses payloads for `ttl` and holds at most
    /// `capacity` sources, dropping the least recently used beyond that.
    pub fn new(fetcher: Arc<dyn Fetcher>, ttl: Duration, capacity: usize) -> Self {
        Self {
            fetcher,
            ttl,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots::default()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Return the cached payload for `source`, fetching it if the entry is
    /// missing or older than the TTL.
    ///
    /// Failed fetches are not stored; the next call tries again.
    pub async fn get_or_fetch(&self, source: &DataSource) -> Result<CachedResponse, UpstreamError> {
        let cell = self.slot(source);
        let mut entry = cell.lock().await;

        if let Some(cached) = entry.as_ref().filter(|c| c.is_fresh(self.ttl)) {
            self.stats.write().hits += 1;
            trace!(source = %source, "Response cache hit");
            return Ok(cached.clone());
        }

        self.stats.write().misses += 1;
        debug!(source = %source, "Response cache miss");

        match self.fetcher.fetch(source).await {
            Ok(payload) => {
                let cached = CachedResponse::new(payload);
                *entry = Some(cached.clone());
                Ok(cached)
            }
            Err(e) => {
                *entry = None;
                self.stats.write().failures += 1;
                Err(e)
            }
        }
    }

    /// Look up or create the slot for `source`, evicting if at capacity.
    ///
    /// Only idle slots are evicted. A slot whose cell is held by a caller
    /// may have a fetch in flight, and dropping it would let the next caller
    /// start a second one. When every slot is busy the cache temporarily
    /// holds more than `capacity` entries.
    fn slot(&self, source: &DataSource) -> Cell {
        let mut guard = self.slots.lock();
        let slots = &mut *guard;
        slots.tick += 1;
        let tick = slots.tick;

        if let Some(slot) = slots.entries.get_mut(source) {
            slot.last_used = tick;
            return slot.cell.clone();
        }

        while slots.entries.len() >= self.capacity {
            let oldest_idle = slots
                .entries
                .iter()
                .filter(|(_, slot)| Arc::strong_count(&slot.cell) == 1)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());

            let Some(oldest) = oldest_idle else {
                debug!(
                    entries = slots.entries.len(),
                    capacity = self.capacity,
                    "All cached sources busy, exceeding capacity"
                );
                break;
            };

            slots.entries.remove(&oldest);
            self.stats.write().evictions += 1;
            debug!(source = %oldest, capacity = self.capacity, "Evicted cached response");
        }

        let cell = Cell::default();
        slots.entries.insert(
            source.clone(),
            Slot {
                cell: cell.clone(),
                last_used: tick,
            },
        );
        cell
    }

    /// Number of sources currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
