//! In-memory response cache keyed by normalized location.
//!
//! Backed by a moka cache with a time-to-live and an LRU size bound.
//! Hit/miss counters sit beside it and survive [`ResponseCache::clear`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::{policy::EvictionPolicy, sync::Cache};
use serde::Serialize;
use tracing::{debug, info};

use crate::{config::CacheConfig, model::AggregatedWeather};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Percent, two decimals.
    pub hit_ratio: f64,
    pub current_size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_size: usize,
    entries: Cache<String, AggregatedWeather>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Trim and lowercase; `lat,lon` pairs are re-rendered to 4 decimals so
/// equivalent coordinates share a key.
pub fn normalize_key(location: &str) -> String {
    let key = location.trim().to_lowercase();

    let parts: Vec<&str> = key.split(',').map(str::trim).collect();
    if let [lat, lon] = parts.as_slice() {
        if let (Ok(lat), Ok(lon)) = (lat.parse::<f64>(), lon.parse::<f64>()) {
            return format!("{lat:.4},{lon:.4}");
        }
    }

    key
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(u64::try_from(max_size).unwrap_or(u64::MAX))
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            ttl,
            max_size,
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_size)
    }

    pub fn get(&self, location: &str) -> Option<AggregatedWeather> {
        let key = normalize_key(location);
        match self.entries.get(&key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = %key, "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = %key, "Cache miss");
                None
            }
        }
    }

    pub fn set(&self, location: &str, value: AggregatedWeather) {
        let key = normalize_key(location);
        debug!(cache_key = %key, ttl_secs = self.ttl.as_secs(), "Cached response");
        self.entries.insert(key, value);
    }

    /// Drop every entry, keeping the hit/miss counters. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.len();
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        info!(removed, "Cache cleared");
        removed
    }

    /// Live entries, after pending evictions and expirations have been applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_ratio = if total_requests == 0 {
            0.0
        } else {
            (hits as f64 / total_requests as f64 * 10_000.0).round() / 100.0
        };

        CacheStats {
            hits,
            misses,
            total_requests,
            hit_ratio,
            current_size: self.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
