//! Generic TTL + LRU cache for completed analysis results.
//!
//! Capacity is enforced by an LRU eviction policy; staleness is enforced
//! by a per-entry TTL checked again on every read. The double check covers
//! the window where an entry is past its TTL but the LRU structure has not
//! reclaimed it yet.

use lru::LruCache;
use regex::Regex;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Why an entry left the cache. Passed to the disposal hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalCause {
    /// TTL elapsed and the entry was dropped on read.
    Expired,
    /// LRU capacity eviction.
    Evicted,
    /// Explicit `remove` call.
    Removed,
    /// Matched an `invalidate_matching` pattern.
    Invalidated,
    /// `clear` dropped the whole store.
    Cleared,
}

/// Observability hook invoked whenever an entry is disposed of.
pub type DisposalHook = Box<dyn Fn(&str, DisposalCause) + Send + Sync>;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction kicks in.
    pub max_entries: usize,
    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Duration,
    /// Whether a `get` hit refreshes the entry's recency.
    pub refresh_on_get: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            default_ttl: Duration::from_secs(3600),
            refresh_on_get: true,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> Entry<T> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Thread-safe TTL + LRU cache.
///
/// The lock is a plain `Mutex` held only across non-await sections; the
/// async read-through path releases it before invoking the factory.
pub struct TtlCache<T: Clone> {
    inner: Mutex<LruCache<String, Entry<T>>>,
    default_ttl: Duration,
    refresh_on_get: bool,
    on_dispose: Option<DisposalHook>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    /// Create a cache with the given configuration.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            default_ttl: config.default_ttl,
            refresh_on_get: config.refresh_on_get,
            on_dispose: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Attach a disposal hook invoked for every entry that leaves the
    /// cache, with the cause.
    pub fn with_disposal_hook(mut self, hook: DisposalHook) -> Self {
        self.on_dispose = Some(hook);
        self
    }

    fn dispose(&self, key: &str, cause: DisposalCause) {
        if let Some(hook) = &self.on_dispose {
            hook(key, cause);
        }
    }

    /// Insert a value with the default TTL.
    pub fn set(&self, key: &str, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert a value with an explicit TTL.
    pub fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) {
        let entry = Entry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        let evicted = {
            let mut cache = self.inner.lock().expect("cache lock poisoned");
            cache.push(key.to_string(), entry)
        };
        // push returns the displaced pair: either the old value for the
        // same key (an update, not an eviction) or the LRU victim.
        if let Some((victim, _)) = evicted {
            if victim != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %victim, "cache entry evicted at capacity");
                self.dispose(&victim, DisposalCause::Evicted);
            }
        }
    }

    /// Get a value if present and not expired.
    ///
    /// Expired entries are reclaimed here even if the LRU structure has
    /// not evicted them yet. A hit refreshes recency when `refresh_on_get`
    /// is enabled.
    pub fn get(&self, key: &str) -> Option<T> {
        let result = {
            let mut cache = self.inner.lock().expect("cache lock poisoned");
            let expired = match cache.peek(key) {
                Some(entry) => entry.is_expired(),
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };
            if expired {
                cache.pop(key);
                None
            } else if self.refresh_on_get {
                cache.get(key).map(|e| e.value.clone())
            } else {
                cache.peek(key).map(|e| e.value.clone())
            }
        };
        match result {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.dispose(key, DisposalCause::Expired);
                None
            }
        }
    }

    /// Whether a live (non-expired) entry exists, without touching recency.
    pub fn has(&self, key: &str) -> bool {
        let cache = self.inner.lock().expect("cache lock poisoned");
        cache.peek(key).is_some_and(|e| !e.is_expired())
    }

    /// Remove an entry. Returns true if it existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut cache = self.inner.lock().expect("cache lock poisoned");
            cache.pop(key).is_some()
        };
        if removed {
            self.dispose(key, DisposalCause::Removed);
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let keys: Vec<String> = {
            let mut cache = self.inner.lock().expect("cache lock poisoned");
            let keys = cache.iter().map(|(k, _)| k.clone()).collect();
            cache.clear();
            keys
        };
        for key in keys {
            self.dispose(&key, DisposalCause::Cleared);
        }
    }

    /// Read-through: return the cached value or await `factory`, store its
    /// result under `key`, and return it.
    ///
    /// There is no in-flight coalescing here; concurrent callers on a miss
    /// each run the factory. Request deduplication is the deduplicator's
    /// job.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = factory().await?;
        self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(value)
    }

    /// Remove every key matching `pattern`. Returns how many were removed.
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        let victims: Vec<String> = {
            let cache = self.inner.lock().expect("cache lock poisoned");
            cache
                .iter()
                .filter(|(k, _)| pattern.is_match(k))
                .map(|(k, _)| k.clone())
                .collect()
        };
        let mut count = 0;
        {
            let mut cache = self.inner.lock().expect("cache lock poisoned");
            for key in &victims {
                if cache.pop(key).is_some() {
                    count += 1;
                }
            }
        }
        for key in &victims {
            self.dispose(key, DisposalCause::Invalidated);
        }
        count
    }

    /// Number of entries currently held, including not-yet-reclaimed
    /// expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
