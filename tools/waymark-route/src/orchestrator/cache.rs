//! TTL route cache with oldest-first eviction
//!
//! Keys carry every parameter that changes the answer: rounded endpoints,
//! vehicle parameters, the hazard-avoidance flag and the full preference
//! set. Leaving one out lets two different requests share an entry.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use waymark_common::LatLon;

use crate::engine::VehicleParams;
use crate::hazard::{HazardCategory, HazardPreferences};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PreferenceKey {
    pub category: HazardCategory,
    pub enabled: bool,
    pub threshold_bits: u64,
    pub penalty_bits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RouteCacheKey {
    pub start: (i64, i64),
    pub end: (i64, i64),
    pub vehicle: VehicleParams,
    pub hazard_avoidance: bool,
    pub preferences: Vec<PreferenceKey>,
}

impl RouteCacheKey {
    pub fn new(
        start: LatLon,
        end: LatLon,
        vehicle: VehicleParams,
        hazard_avoidance: bool,
        preferences: &HazardPreferences,
        precision: u32,
    ) -> Self {
        Self {
            start: start.quantize(precision),
            end: end.quantize(precision),
            vehicle,
            hazard_avoidance,
            preferences: preferences
                .iter()
                .map(|p| PreferenceKey {
                    category: p.category,
                    enabled: p.enabled,
                    threshold_bits: p.proximity_threshold_m.to_bits(),
                    penalty_bits: p.penalty_seconds.to_bits(),
                })
                .collect(),
        }
    }

    /// Stable hex digest, used in logs.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    seq: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Insertion sequence to key, oldest first.
    order: BTreeMap<u64, K>,
    next_seq: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// Shared cache; every operation takes one short lock.
pub struct RouteCache<V, K = RouteCacheKey> {
    config: CacheConfig,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> RouteCache<V, K> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: CacheConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(e) => now.saturating_duration_since(e.inserted) >= self.config.ttl,
        };
        if expired {
            inner.remove(key);
            inner.stats.misses += 1;
            return None;
        }
        inner.stats.hits += 1;
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Inserts or replaces an entry; a replaced entry counts as new.
    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.inner.lock();
        inner.remove(&key);
        while inner.entries.len() >= self.config.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.stats.evictions += 1;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                seq,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }
}
