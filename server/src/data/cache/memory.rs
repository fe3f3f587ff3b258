//! In-memory cache implementation using moka + dashmap
//!
//! Uses moka for the value cache with per-entry TTLs and dashmap for
//! atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::Expiry;
use moka::future::Cache;

use super::backend::CacheBackend;
use super::error::CacheError;
use crate::core::config::CacheConfig;

/// Cache entry with data and its TTL
#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
}

/// Per-entry expiry tracking for variable TTLs
struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Counter entry; `expires_at` is `None` for counters without a TTL
struct CounterEntry {
    count: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
    counters: DashMap<String, CounterEntry>,
    /// Counter for cleanup scheduling (increments on every incr operation)
    cleanup_ops: AtomicU64,
}

impl InMemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .initial_capacity((config.max_entries as usize / 4).min(10_000))
            .expire_after(VariableTtlExpiry)
            .build();

        Self {
            cache,
            counters: DashMap::new(),
            cleanup_ops: AtomicU64::new(0),
        }
    }

    fn cleanup_expired_counters(&self) {
        let now = Instant::now();
        self.counters.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.data))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry { data: value, ttl };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);

        // Entry API holds the shard lock for the whole read-modify-write
        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.is_expired(now) {
                    counter.count = delta;
                    counter.expires_at = expires_at;
                } else {
                    counter.count = counter.count.checked_add(delta).ok_or_else(|| {
                        CacheError::Operation(format!("counter overflow for key {key}"))
                    })?;
                }
                counter.count
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    count: delta,
                    expires_at,
                });
                delta
            }
        };

        let ops = self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
        if ops.is_multiple_of(256) {
            self.cleanup_expired_counters();
        }

        Ok(count)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheBackendType;
    use std::sync::Arc;

    fn test_config() -> CacheConfig {
        CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            redis_url: None,
        }
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = InMemoryCache::new(&test_config());

        cache.set("key1", b"value1".to_vec(), None).await.unwrap();
        let result = cache.get("key1").await.unwrap();
        assert_eq!(result, Some(b"value1".to_vec()));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_by_returns_post_increment_value() {
        let cache = InMemoryCache::new(&test_config());

        assert_eq!(cache.incr_by("c", 300, None).await.unwrap(), 300);
        assert_eq!(cache.incr_by("c", 5, None).await.unwrap(), 305);
        assert_eq!(cache.incr_by("other", 1, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_by_resets_after_expiry() {
        let cache = InMemoryCache::new(&test_config());

        let ttl = Some(Duration::from_millis(20));
        assert_eq!(cache.incr_by("c", 10, ttl).await.unwrap(), 10);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.incr_by("c", 3, ttl).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incr_by_is_atomic_under_concurrency() {
        let cache = Arc::new(InMemoryCache::new(&test_config()));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.incr_by("shared", 4, None).await.unwrap() })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results.sort_unstable();
        let expected: Vec<i64> = (1..=32).map(|i| i * 4).collect();
        assert_eq!(results, expected);
    }
}
