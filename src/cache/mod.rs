//! Plan/Result Cache (C4): a bounded, TTL'd cache keyed by intent+user,
//! backed by `dashmap` for lock-free concurrent access across requests.
//!
//! Eviction is custom (not delegated to an off-the-shelf LRU crate)
//! because the bound is dual — entry count *and* total byte size — and
//! the tie-break on eviction (lowest access count, then oldest
//! `cached_at`) doesn't match a standard LRU/LFU policy exactly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;
const EVICTION_FRACTION: f64 = 0.10;

struct Entry {
    value: Value,
    cached_at: Instant,
    expires_at: Instant,
    access_count: AtomicU64,
    size_bytes: usize,
}

/// Key identifying a cached plan/result: an intent scoped to the caller
/// whose request produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: String,
    pub intent: String,
}

impl CacheKey {
    pub fn new(user_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), intent: intent.into() }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct Cache {
    entries: DashMap<CacheKey, Entry>,
    ttl: Duration,
    max_entries: usize,
    max_bytes: usize,
    total_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_limits(ttl, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            max_bytes,
            total_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `key` if present and unexpired,
    /// bumping its access count. Lazily removes the entry if its TTL has
    /// elapsed.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                entry.access_count.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.remove(key);
        None
    }

    pub fn set(&self, key: CacheKey, value: Value) {
        let size_bytes = estimate_size(&value);
        let now = Instant::now();
        let entry = Entry {
            value,
            cached_at: now,
            expires_at: now + self.ttl,
            access_count: AtomicU64::new(0),
            size_bytes,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes.fetch_sub(old.size_bytes as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size_bytes as u64, Ordering::Relaxed);
        self.enforce_bounds();
    }

    pub fn remove(&self, key: &CacheKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.total_bytes.fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            bytes: self.total_bytes.load(Ordering::Relaxed) as usize,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn enforce_bounds(&self) {
        if self.entries.len() <= self.max_entries
            && (self.total_bytes.load(Ordering::Relaxed) as usize) <= self.max_bytes
        {
            return;
        }

        let mut candidates: Vec<(CacheKey, u64, Instant)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().access_count.load(Ordering::Relaxed), r.value().cached_at))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let over_count = self.entries.len().saturating_sub(self.max_entries);
        let target_evictions = if (self.total_bytes.load(Ordering::Relaxed) as usize) > self.max_bytes {
            ((candidates.len() as f64) * EVICTION_FRACTION).ceil() as usize
        } else {
            0
        };
        let evictions = over_count.max(target_evictions).max(1).min(candidates.len());

        for (key, _, _) in candidates.into_iter().take(evictions) {
            self.remove(&key);
            if self.entries.len() <= self.max_entries
                && (self.total_bytes.load(Ordering::Relaxed) as usize) <= self.max_bytes
            {
                break;
            }
        }
    }
}

fn estimate_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
