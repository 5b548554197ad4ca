//! Advisory identity cache
//!
//! Bounded LRU with a per-entry TTL. Entries are only a display fallback: a
//! hit never replaces the verification call.
//!
//! Recency is tracked with a monotonically increasing tick per access; the
//! `order` map indexes ticks to keys so the least recent entry is the first.

use crate::domain::types::Subject;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A resolved identity held by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIdentity {
    pub document_id: String,
    pub resolved: Subject,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedIdentity {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) > self.ttl
    }
}

struct Slot {
    identity: CachedIdentity,
    tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

pub struct IdentityCache {
    capacity: usize,
    ttl: Duration,
    entries: FxHashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl IdentityCache {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ttl,
            entries: FxHashMap::default(),
            order: BTreeMap::new(),
            next_tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    /// Look up an identity, refreshing its recency on a hit
    pub fn get(&mut self, document_id: &str, now: Instant) -> Option<CachedIdentity> {
        let Some(slot) = self.entries.get(document_id) else {
            self.misses += 1;
            return None;
        };

        if slot.identity.is_expired(now) {
            let tick = slot.tick;
            self.entries.remove(document_id);
            self.order.remove(&tick);
            self.expirations += 1;
            self.misses += 1;
            debug!(document_id = %document_id, "identity_cache_expired");
            return None;
        }

        let tick = self.bump();
        let slot = self.entries.get_mut(document_id)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, document_id.to_string());
        self.hits += 1;
        Some(slot.identity.clone())
    }

    /// Insert or refresh an identity as most recent
    pub fn set(&mut self, document_id: &str, resolved: Subject, now: Instant) {
        let tick = self.bump();
        let identity = CachedIdentity {
            document_id: document_id.to_string(),
            resolved,
            cached_at: now,
            ttl: self.ttl,
        };

        if let Some(slot) = self.entries.get_mut(document_id) {
            self.order.remove(&slot.tick);
            slot.identity = identity;
            slot.tick = tick;
            self.order.insert(tick, document_id.to_string());
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(document_id.to_string(), Slot { identity, tick });
        self.order.insert(tick, document_id.to_string());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            size: self.entries.len(),
            capacity: self.capacity,
            hit_rate: if lookups > 0 { self.hits as f64 / lookups as f64 } else { 0.0 },
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(document_id = %key, "identity_cache_evicted");
        }
    }
}
