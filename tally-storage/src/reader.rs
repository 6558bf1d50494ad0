//! Cached collection reader.
//!
//! Every interactive read goes through [`CollectionReader::fetch`]: check the
//! [`QueryCache`] unless told to bypass it, otherwise run the constraints
//! against the document store, cache the result and hand it back. Request
//! accounting is kept in a [`RequestStats`] owned by the reader (or shared
//! explicitly between readers), never in a process-wide global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tally_core::{Clock, Record, SystemClock, TallyResult};

use crate::cache::{CacheRead, QueryCache};
use crate::constants::{DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_QUERY_TTL};
use crate::normalize::{decode_all, FromRecord};
use crate::store::{Constraint, DocumentStore};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for a [`CollectionReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// TTL applied to every result the reader caches (default: 5 minutes)
    pub query_ttl: Duration,

    /// Bound on cached results; 0 means unbounded (default: 1000)
    pub max_entries: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            query_ttl: DEFAULT_QUERY_TTL,
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ReaderConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TALLY_QUERY_TTL_SECS`: TTL for cached query results (default: 300)
    /// - `TALLY_QUERY_CACHE_MAX_ENTRIES`: Cache bound, 0 disables it (default: 1000)
    pub fn from_env() -> Self {
        let query_ttl = std::env::var("TALLY_QUERY_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_QUERY_TTL);

        let max_entries = std::env::var("TALLY_QUERY_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CACHE_ENTRIES);

        Self {
            query_ttl,
            max_entries,
        }
    }

    /// Set the TTL for cached results.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.query_ttl = ttl;
        self
    }

    /// Set the cache bound (0 disables it).
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
}

// ============================================================================
// REQUEST STATS
// ============================================================================

/// Fetch accounting: one increment per `fetch` call, never per cache lookup.
///
/// `reads` counts fetches served by the store, `cached` those served from
/// the cache. Both only ever grow.
#[derive(Debug, Default)]
pub struct RequestStats {
    reads: AtomicU64,
    cached: AtomicU64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> u64 {
        self.cached.load(Ordering::Relaxed)
    }

    /// Get current snapshot of both counters.
    pub fn snapshot(&self) -> RequestStatsSnapshot {
        RequestStatsSnapshot {
            reads: self.reads(),
            cached: self.cached(),
        }
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cached(&self) {
        self.cached.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStatsSnapshot {
    pub reads: u64,
    pub cached: u64,
}

impl RequestStatsSnapshot {
    pub fn total(&self) -> u64 {
        self.reads + self.cached
    }
}

// ============================================================================
// FETCH OPTIONS
// ============================================================================

/// Per-call cache options.
///
/// The key must deterministically encode the collection, the constraints
/// and the subject. Two different queries sharing a key will serve each
/// other's results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache_key: String,
    pub bypass_cache: bool,
}

impl FetchOptions {
    /// Serve from cache when a live entry exists.
    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            cache_key: key.into(),
            bypass_cache: false,
        }
    }

    /// Always go to the store, then refresh the cache entry.
    pub fn fresh(key: impl Into<String>) -> Self {
        Self {
            cache_key: key.into(),
            bypass_cache: true,
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

/// One fetch in a [`CollectionReader::preload`] batch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub collection: String,
    pub constraints: Vec<Constraint>,
    pub options: FetchOptions,
}

impl FetchRequest {
    pub fn new(
        collection: impl Into<String>,
        constraints: Vec<Constraint>,
        options: FetchOptions,
    ) -> Self {
        Self {
            collection: collection.into(),
            constraints,
            options,
        }
    }
}

// ============================================================================
// READER
// ============================================================================

/// Read-through reader over a [`DocumentStore`].
pub struct CollectionReader<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    cache: Arc<QueryCache>,
    stats: Arc<RequestStats>,
    config: ReaderConfig,
}

impl<S: DocumentStore + ?Sized> Clone for CollectionReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            stats: Arc::clone(&self.stats),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> std::fmt::Debug for CollectionReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionReader")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl<S: DocumentStore + ?Sized> CollectionReader<S> {
    /// Reader with its own cache and counters, timed by the system clock.
    pub fn new(store: Arc<S>, config: ReaderConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Reader with its own cache and counters, timed by `clock`.
    pub fn with_clock(store: Arc<S>, config: ReaderConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = QueryCache::new(clock).with_max_entries(config.max_entries);
        Self::from_parts(store, Arc::new(cache), Arc::new(RequestStats::new()), config)
    }

    /// Reader over an existing cache and counters, e.g. shared with another reader.
    pub fn from_parts(
        store: Arc<S>,
        cache: Arc<QueryCache>,
        stats: Arc<RequestStats>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            store,
            cache,
            stats,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Fetch a collection's records matching `constraints`.
    ///
    /// Without bypass a live cache entry is returned as is. Otherwise the
    /// store is queried and its result replaces the entry under
    /// `options.cache_key`. A failed query propagates and leaves the cache
    /// and the counters untouched.
    pub async fn fetch(
        &self,
        collection: &str,
        constraints: &[Constraint],
        options: &FetchOptions,
    ) -> TallyResult<CacheRead<Vec<Record>>> {
        if !options.bypass_cache {
            if let Some((payload, stored_at)) = self.cache.get(&options.cache_key) {
                self.stats.record_cached();
                tracing::debug!(
                    collection,
                    key = %options.cache_key,
                    records = payload.len(),
                    "Query cache hit"
                );
                return Ok(CacheRead::from_cache(payload, stored_at));
            }
        }

        let records = match self.store.query(collection, constraints).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    collection,
                    key = %options.cache_key,
                    error = %e,
                    "Collection query failed"
                );
                return Err(e);
            }
        };

        let fetched_at = self.cache.clock().now();
        self.cache
            .put(options.cache_key.clone(), records.clone(), self.config.query_ttl);
        self.stats.record_read();
        tracing::debug!(
            collection,
            key = %options.cache_key,
            records = records.len(),
            bypass = options.bypass_cache,
            "Query served from store"
        );

        Ok(CacheRead::from_store(records, fetched_at))
    }

    /// [`fetch`](Self::fetch) and decode into typed entities. Records that
    /// fail to decode are dropped.
    pub async fn fetch_as<T: FromRecord>(
        &self,
        collection: &str,
        constraints: &[Constraint],
        options: &FetchOptions,
    ) -> TallyResult<CacheRead<Vec<T>>> {
        let read = self.fetch(collection, constraints, options).await?;
        Ok(read.map(|records| decode_all(&records)))
    }

    /// Run several fetches concurrently. Equivalent to fetching each request
    /// in turn: every fetch runs to completion and populates the cache even
    /// if a sibling fails. The first error in request order is returned.
    pub async fn preload(
        &self,
        requests: &[FetchRequest],
    ) -> TallyResult<Vec<CacheRead<Vec<Record>>>> {
        join_all(
            requests
                .iter()
                .map(|r| self.fetch(&r.collection, &r.constraints, &r.options)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Drop the cached result for `key`, e.g. after writing to its collection.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.cache.invalidate(key);
        if removed {
            tracing::debug!(key, "Query cache entry invalidated");
        }
        removed
    }
}
