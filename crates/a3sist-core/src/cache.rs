//! Single-Flight Cache
//!
//! `get_or_create` guarantees that concurrent callers for the same key run
//! the producer at most once:
//!
//! 1. fast path: a live entry is returned without locking
//! 2. miss: take the per-key lock, re-check, produce, store with a TTL
//! 3. drop the per-key lock once the value is stored
//!
//! `coalesce` uses the same locks but keeps a value only while callers that
//! overlapped its production are still collecting it.
//!
//! Entries and per-key locks live in separate maps, so expiry and
//! compaction never wait on an in-flight producer.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when callers do not pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Entry count above which compaction evicts the soonest-expiring entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval of the periodic compaction pass
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    1000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Set the default TTL
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the entry limit
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Cleanup interval as a duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet compacted
    pub entries: usize,
    /// Keys with a producer in flight
    pub in_flight: usize,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that ran a producer
    pub misses: u64,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Keyed cache with per-key single-flight production
pub struct SingleFlightCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> SingleFlightCache<V> {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live value for a key
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    /// Store a value
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        if self.entries.len() > self.config.max_entries {
            self.compact();
        }
    }

    /// Drop a key; returns whether it was stored
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Return the cached value or produce it exactly once across concurrent
    /// callers.
    pub async fn get_or_create<F, Fut>(&self, key: &str, ttl: Option<Duration>, factory: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let produced: Result<V, std::convert::Infallible> = self
            .get_or_try_create(key, ttl, || async { Ok(factory().await) })
            .await;
        match produced {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_create`](Self::get_or_create), but errors are returned
    /// to the caller that produced them and never cached.
    pub async fn get_or_try_create<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        if let Some(value) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            drop(guard);
            self.release_lock(key, &lock, true);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss, producing value");
        let produced = factory().await;
        let stored = produced.is_ok();
        if let Ok(value) = &produced {
            let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
            self.insert(key, value.clone(), ttl);
        }

        drop(guard);
        self.release_lock(key, &lock, stored);
        produced
    }

    /// Share one production among callers that overlap in time.
    ///
    /// Callers that arrive while a producer for `key` is running receive its
    /// value; the value is dropped once the last of them returns, so a caller
    /// arriving afterwards produces afresh. Failures are never shared.
    pub async fn coalesce<F, Fut, E>(&self, key: &str, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let produced = match self.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "No producer in flight, producing value");
                let produced = factory().await;
                if let Ok(value) = &produced {
                    self.insert(key, value.clone(), self.config.default_ttl());
                }
                produced
            }
        };

        drop(guard);
        // The last caller out takes the shared value with the lock
        self.locks.remove_if(key, |_, current| {
            let last = Arc::ptr_eq(current, &lock) && Arc::strong_count(current) <= 2;
            if last {
                self.entries.remove(key);
            }
            last
        });
        produced
    }

    /// Remove the per-key lock if it is still the one we used. After a
    /// failed production the lock stays while other callers wait on it.
    fn release_lock(&self, key: &str, lock: &Arc<Mutex<()>>, stored: bool) {
        self.locks.remove_if(key, |_, current| {
            Arc::ptr_eq(current, lock) && (stored || Arc::strong_count(current) <= 2)
        });
    }

    /// Drop expired entries, then evict the soonest-expiring entries while
    /// above `max_entries`. Returns the number of entries removed.
    pub fn compact(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);

        let excess = self.entries.len().saturating_sub(self.config.max_entries);
        if excess > 0 {
            let mut by_expiry: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);
            for (key, _) in by_expiry.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Cache compacted");
        }
        removed
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            in_flight: self.locks.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Hex SHA-256 over the given parts, separated so that part boundaries
/// cannot collide
pub fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests;
