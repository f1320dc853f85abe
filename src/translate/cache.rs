//! Two-tier translation cache.
//! Fast tier: LRU of resolved values, authoritative once a key is in it.
//! Durable tier: in-memory mirror of the persisted blob, TTL-filtered and
//! bounded to `max_entries` on every snapshot.

use std::collections::HashMap;

use lru::LruCache;
use tracing::{debug, info};

use super::{CacheEntry, CacheKey, DAY_MS};

/// Returns true if `entry` is older than `ttl_days`. `ttl_days <= 0` disables expiry.
pub fn is_expired(entry: &CacheEntry, ttl_days: i64, now_ms: i64) -> bool {
    ttl_days > 0 && now_ms.saturating_sub(entry.timestamp_ms) > ttl_days.saturating_mul(DAY_MS)
}

pub struct CacheManager {
    fast: LruCache<CacheKey, String>,
    durable: HashMap<CacheKey, CacheEntry>,
    ttl_days: i64,
    max_entries: usize,
}

impl CacheManager {
    pub fn new(ttl_days: i64, max_entries: usize) -> Self {
        Self {
            // The bound applies to what gets persisted, not to the process.
            fast: LruCache::unbounded(),
            durable: HashMap::new(),
            ttl_days,
            max_entries: max_entries.max(1),
        }
    }

    pub fn set_limits(&mut self, ttl_days: i64, max_entries: usize) {
        self.ttl_days = ttl_days;
        self.max_entries = max_entries.max(1);
    }

    /// Fast tier first; on a miss, promote a live durable entry.
    pub fn lookup(&mut self, key: &CacheKey, now_ms: i64) -> Option<String> {
        if let Some(value) = self.fast.get(key) {
            return Some(value.clone());
        }
        let entry = self.durable.get(key)?;
        if is_expired(entry, self.ttl_days, now_ms) {
            return None;
        }
        let value = entry.value.clone();
        self.fast.put(key.clone(), value.clone());
        debug!(key = %key.digest(), "promoted durable entry to fast tier");
        Some(value)
    }

    /// Insert a translation into both tiers. Empty values are refused so a
    /// failed translation can be retried later. Returns whether it was stored.
    pub fn insert(&mut self, key: CacheKey, value: String, now_ms: i64) -> bool {
        if value.is_empty() {
            return false;
        }
        self.durable
            .insert(key.clone(), CacheEntry::new(value.clone(), now_ms));
        self.fast.put(key, value);
        true
    }

    pub fn clear(&mut self) {
        self.fast.clear();
        self.durable.clear();
    }

    /// Drop expired durable entries (and their fast-tier copies, so the next
    /// snapshot cannot write them back with a fresh timestamp).
    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        let expired: Vec<CacheKey> = self
            .durable
            .iter()
            .filter(|(_, entry)| is_expired(entry, self.ttl_days, now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.durable.remove(key);
            self.fast.pop(key);
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "purged expired cache entries");
        }
        expired.len()
    }

    /// Replace both tiers with freshly loaded entries, minus expired ones.
    /// Returns the number of entries kept.
    pub fn rebuild(&mut self, mut entries: Vec<(CacheKey, CacheEntry)>, now_ms: i64) -> usize {
        self.clear();
        entries.retain(|(_, entry)| !is_expired(entry, self.ttl_days, now_ms));
        // Oldest first so the LRU order follows entry age.
        entries.sort_by_key(|(_, entry)| entry.timestamp_ms);

        for (key, entry) in entries {
            self.fast.put(key.clone(), entry.value.clone());
            self.durable.insert(key, entry);
        }
        self.durable.len()
    }

    /// Resolved fast-tier values to persist, most recently used first, capped at
    /// `max_entries`. The durable mirror becomes exactly this set.
    pub fn snapshot(&mut self, now_ms: i64) -> Vec<(CacheKey, CacheEntry)> {
        let snapshot: Vec<(CacheKey, CacheEntry)> = self
            .fast
            .iter()
            .take(self.max_entries)
            .map(|(key, value)| {
                let timestamp_ms = self
                    .durable
                    .get(key)
                    .filter(|entry| entry.value == *value)
                    .map(|entry| entry.timestamp_ms)
                    .unwrap_or(now_ms);
                (key.clone(), CacheEntry::new(value.clone(), timestamp_ms))
            })
            .collect();

        self.durable = snapshot.iter().cloned().collect();
        snapshot
    }

    pub fn fast_len(&self) -> usize {
        self.fast.len()
    }

    pub fn durable_len(&self) -> usize {
        self.durable.len()
    }
}
