//! Bounded, TTL'd query-result cache keyed by a fingerprint over the query
//! shape.
//!
//! Keyed lookups go through a `dashmap::DashMap` from fingerprint to
//! result, with TTL expiry and soft LRU eviction under capacity pressure.
//! `dashmap`'s sharded locking gives an "at most one entry per
//! fingerprint, race-free" guarantee without a single crate-wide mutex.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::metric::Metric;
use crate::record::VectorId;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache capacity must be positive")]
    InvalidCapacity,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// The inputs that determine a search result, hashed into a single
/// fingerprint: metric, k, threshold, and the raw query embedding.
#[derive(Debug, Clone, Serialize)]
struct FingerprintInput<'a> {
    metric: Metric,
    k: usize,
    threshold_bits: u32,
    embedding: &'a [f32],
}

pub fn fingerprint(metric: Metric, k: usize, threshold: f32, embedding: &[f32]) -> u64 {
    let input = FingerprintInput {
        metric,
        k,
        threshold_bits: threshold.to_bits(),
        embedding,
    };
    let bytes = postcard::to_allocvec(&input).expect("fingerprint input always serializes");
    let hash = blake3::hash(&bytes);
    u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

#[derive(Debug, Clone)]
struct Entry {
    results: Vec<(VectorId, f32)>,
    inserted_at: Instant,
    last_accessed: Instant,
}

/// Hit/miss/eviction counters, exposed if the caller wants observability
/// into cache effectiveness.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Fixed-capacity, TTL'd map from query fingerprint to ranked results.
pub struct QueryCache {
    config: CacheConfig,
    entries: DashMap<u64, Entry>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    evictions: std::sync::atomic::AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        if config.capacity == 0 {
            return Err(CacheError::InvalidCapacity);
        }
        Ok(Self {
            config,
            entries: DashMap::new(),
            hits: Default::default(),
            misses: Default::default(),
            evictions: Default::default(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up a fingerprint, returning `None` on a miss or an expired
    /// entry (which is evicted on the way out).
    pub fn get(&self, key: u64) -> Option<Vec<(VectorId, f32)>> {
        if !self.config.enabled {
            return None;
        }
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if entry.inserted_at.elapsed() > self.config.ttl {
                drop(entry);
                self.entries.remove(&key);
                self.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return None;
            }
            entry.last_accessed = Instant::now();
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Some(entry.results.clone());
        }
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    /// Insert a result set under `key`. If at capacity, evicts the least
    /// recently used entry first. `dashmap::DashMap::entry` makes the
    /// insert-if-absent check and the write atomic per shard, so concurrent
    /// inserts for the same fingerprint never produce two live entries.
    pub fn insert(&self, key: u64, results: Vec<(VectorId, f32)>) {
        if !self.config.enabled {
            return;
        }
        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            Entry {
                results,
                inserted_at: now,
                last_accessed: now,
            },
        );
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_accessed)
            .map(|e| *e.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Drop every entry. Called by the facade on any mutation that could
    /// invalidate cached results; in practice the facade prefers bumping a
    /// shard epoch and only calls this for a full manual reset.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            evictions: self.evictions.load(std::sync::atomic::Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache(capacity: usize, ttl: Duration) -> QueryCache {
        QueryCache::new(CacheConfig { capacity, ttl, enabled: true }).unwrap()
    }

    #[test]
    fn hit_after_insert_within_ttl() {
        let c = cache(10, Duration::from_secs(60));
        let key = fingerprint(Metric::Cosine, 5, 0.0, &[1.0, 2.0]);
        c.insert(key, vec![(VectorId(1), 0.5)]);
        assert_eq!(c.get(key), Some(vec![(VectorId(1), 0.5)]));
    }

    #[test]
    fn miss_after_ttl_expiry() {
        let c = cache(10, Duration::from_millis(10));
        let key = fingerprint(Metric::Cosine, 5, 0.0, &[1.0, 2.0]);
        c.insert(key, vec![(VectorId(1), 0.5)]);
        sleep(Duration::from_millis(30));
        assert_eq!(c.get(key), None);
    }

    #[test]
    fn evicts_lru_under_capacity_pressure() {
        let c = cache(2, Duration::from_secs(60));
        let k1 = fingerprint(Metric::Cosine, 1, 0.0, &[1.0]);
        let k2 = fingerprint(Metric::Cosine, 2, 0.0, &[2.0]);
        let k3 = fingerprint(Metric::Cosine, 3, 0.0, &[3.0]);

        c.insert(k1, vec![]);
        c.insert(k2, vec![]);
        c.get(k2); // touch k2 so k1 becomes the LRU entry
        c.insert(k3, vec![]);

        assert!(c.get(k1).is_none());
        assert!(c.entries.contains_key(&k2));
        assert!(c.entries.contains_key(&k3));
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive_to_inputs() {
        let a = fingerprint(Metric::Cosine, 5, 0.1, &[1.0, 2.0]);
        let b = fingerprint(Metric::Cosine, 5, 0.1, &[1.0, 2.0]);
        let c = fingerprint(Metric::Euclidean, 5, 0.1, &[1.0, 2.0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn disabled_cache_never_stores_or_returns() {
        let c = QueryCache::new(CacheConfig { enabled: false, ..CacheConfig::default() }).unwrap();
        let key = fingerprint(Metric::Cosine, 1, 0.0, &[1.0]);
        c.insert(key, vec![(VectorId(1), 0.0)]);
        assert!(c.get(key).is_none());
        assert!(c.is_empty());
    }
}
