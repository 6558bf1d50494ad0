//! Staleness-aware store of query results.
//!
//! Entries expire lazily: an expired entry is evicted by the `get` that
//! observes it, there is no background sweep. Writes replace the whole entry
//! under one lock, so readers never see a partially written payload. Two
//! callers that both miss and both fetch will both `put`; the later one wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tally_core::{Clock, Record, SystemClock, Timestamp};

/// One cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<Record>,
    pub stored_at: Timestamp,
    pub ttl: Duration,
    /// Store order, used for least-recently-stored eviction.
    sequence: u64,
}

impl CacheEntry {
    /// Whether the entry is still valid at `now` (`now - stored_at < ttl`).
    pub fn is_live(&self, now: Timestamp) -> bool {
        let age = now
            .signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < self.ttl
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries dropped because their TTL had elapsed.
    pub expirations: u64,
    /// Number of entries dropped to respect the entry bound.
    pub evictions: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheTable {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    next_sequence: u64,
    stats: CacheStats,
}

impl CacheTable {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.sequence);
        Some(entry)
    }
}

/// Per-key, TTL-bounded cache of query payloads.
#[derive(Debug)]
pub struct QueryCache {
    table: Mutex<CacheTable>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl QueryCache {
    /// Unbounded cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(CacheTable::default()),
            clock,
            max_entries: None,
        }
    }

    /// Bound the number of live entries; the least recently stored entry is
    /// evicted first. A bound of zero disables the limit.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = (max_entries > 0).then_some(max_entries);
        self
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // The table only ever holds complete entries, so a guard recovered from
    // a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, CacheTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Payload and store time for `key`, if present and within its TTL.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<(Vec<Record>, Timestamp)> {
        let now = self.clock.now();
        let mut table = self.lock();

        let lookup = table.entries.get(key).map(|entry| {
            entry
                .is_live(now)
                .then(|| (entry.payload.clone(), entry.stored_at))
        });
        let live = match lookup {
            Some(Some(hit)) => Some(hit),
            Some(None) => {
                table.remove(key);
                table.stats.expirations += 1;
                None
            }
            None => None,
        };

        match live {
            Some(hit) => {
                table.stats.hits += 1;
                Some(hit)
            }
            None => {
                table.stats.misses += 1;
                None
            }
        }
    }

    /// Store or overwrite `key`, stamping it with the current time.
    pub fn put(&self, key: impl Into<String>, payload: Vec<Record>, ttl: Duration) {
        let key = key.into();
        let stored_at = self.clock.now();
        let mut table = self.lock();

        table.remove(&key);

        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.order.insert(sequence, key.clone());
        table.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                payload,
                stored_at,
                ttl,
                sequence,
            },
        );

        if let Some(max) = self.max_entries {
            while table.entries.len() > max {
                let Some((_, oldest)) = table.order.pop_first() else {
                    break;
                };
                table.entries.remove(&oldest);
                table.stats.evictions += 1;
            }
        }
    }

    /// Remove `key` regardless of age. Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.entries.clear();
        table.order.clear();
    }

    /// Number of stored entries, expired-but-unobserved ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let table = self.lock();
        CacheStats {
            entry_count: table.entries.len() as u64,
            ..table.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tally_core::ManualClock;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::from_json(format!("r{}", i), json!({"n": i})))
            .collect()
    }

    fn manual() -> (Arc<ManualClock>, QueryCache) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = QueryCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_put_then_get_returns_payload() {
        let (_, cache) = manual();
        cache.put("k", records(2), Duration::from_secs(60));
        let (payload, _) = cache.get("k").unwrap();
        assert_eq!(payload, records(2));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (clock, cache) = manual();
        cache.put("k", records(1), Duration::from_secs(60));

        clock.advance(chrono::Duration::seconds(59));
        assert!(cache.get("k").is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty(), "expired entry is evicted on read");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_put_resets_stored_at() {
        let (clock, cache) = manual();
        cache.put("k", records(1), Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(50));
        cache.put("k", records(3), Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(50));

        let (payload, stored_at) = cache.get("k").unwrap();
        assert_eq!(payload.len(), 3);
        assert_eq!(stored_at, clock.now() - chrono::Duration::seconds(50));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_removes_unconditionally() {
        let (_, cache) = manual();
        cache.put("k", records(1), Duration::from_secs(600));
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_max_entries_evicts_least_recently_stored() {
        let (_, cache) = manual();
        let cache = cache.with_max_entries(2);
        cache.put("a", records(1), Duration::from_secs(60));
        cache.put("b", records(1), Duration::from_secs(60));
        // Re-storing "a" makes "b" the oldest.
        cache.put("a", records(2), Duration::from_secs(60));
        cache.put("c", records(1), Duration::from_secs(60));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_bound_means_unbounded() {
        let cache = QueryCache::default().with_max_entries(0);
        assert_eq!(cache.max_entries(), None);
        for i in 0..10 {
            cache.put(format!("k{}", i), records(1), Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_zero_ttl_is_never_live() {
        let (_, cache) = manual();
        cache.put("k", records(1), Duration::ZERO);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_concurrent_puts_last_writer_wins() {
        let cache = Arc::new(QueryCache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.put("shared", records(i + 1), Duration::from_secs(60));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let (payload, _) = cache.get("shared").unwrap();
        assert!((1..=8).contains(&payload.len()));
        assert_eq!(cache.len(), 1);
    }
}
