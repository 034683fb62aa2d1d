//! Request deduplication (single-flight).
//!
//! Concurrent requests with the same fingerprint share one execution: the
//! first caller spawns the executor as a detached task, every caller
//! awaits a shared handle to it, and all of them observe the same success
//! or failure. The pending entry lives exactly as long as the computation
//! is in flight; long-term memoization belongs to the cache.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{PipelineError, Result};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct PendingEntry<T: Clone> {
    future: SharedResult<T>,
    abort: AbortHandle,
    subscribers: u64,
    created_at: Instant,
}

/// Observability snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Requests currently in flight.
    pub pending: usize,
    /// Total callers that were coalesced onto an existing execution.
    pub deduplicated: u64,
}

struct DedupInner<T: Clone> {
    pending: Mutex<HashMap<String, PendingEntry<T>>>,
    deduplicated: AtomicU64,
    max_age: Duration,
}

impl<T: Clone> DedupInner<T> {
    /// Drop pending entries older than `max_age`. This is a fail-safe
    /// against a wedged executor leaking map entries; waiters holding the
    /// shared future still receive its eventual settlement.
    fn sweep(&self) {
        let mut pending = self.pending.lock().expect("dedup lock poisoned");
        let before = pending.len();
        pending.retain(|key, entry| {
            let stale = entry.created_at.elapsed() > self.max_age;
            if stale {
                tracing::warn!(key = %key, subscribers = entry.subscribers, "sweeping stale in-flight request");
            }
            !stale
        });
        let swept = before - pending.len();
        if swept > 0 {
            tracing::debug!(swept, "dedup sweep removed stale entries");
        }
    }
}

/// Coalesces identical concurrent requests onto a single execution.
///
/// Owns a background sweep task started at construction and stopped by
/// [`Deduplicator::close`] or drop. Must be created inside a tokio
/// runtime.
pub struct Deduplicator<T: Clone + Send + Sync + 'static> {
    inner: Arc<DedupInner<T>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    /// Create a deduplicator whose sweep runs every `sweep_interval` and
    /// removes pending entries older than `max_age`.
    pub fn new(max_age: Duration, sweep_interval: Duration) -> Self {
        let inner = Arc::new(DedupInner {
            pending: Mutex::new(HashMap::new()),
            deduplicated: AtomicU64::new(0),
            max_age,
        });

        let weak: Weak<DedupInner<T>> = Arc::downgrade(&inner);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.sweep();
            }
        });

        Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Return the shared result for `key`, starting `make()` only if no
    /// execution is already in flight.
    ///
    /// The executor runs as a detached task, so it settles even if every
    /// waiter is dropped mid-await. All coalesced callers observe the same
    /// value or the same error.
    pub async fn coalesce<F>(&self, key: &str, make: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let shared = {
            let mut pending = self.inner.pending.lock().expect("dedup lock poisoned");
            if let Some(entry) = pending.get_mut(key) {
                entry.subscribers += 1;
                self.inner.deduplicated.fetch_add(1, Ordering::Relaxed);
                entry.future.clone()
            } else {
                let handle = tokio::spawn(make());
                let abort = handle.abort_handle();
                let fut: BoxFuture<'static, Result<T>> = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(err) if err.is_cancelled() => Err(PipelineError::Cancelled),
                        Err(err) => {
                            Err(PipelineError::Internal(format!("executor task failed: {err}")))
                        }
                    }
                }
                .boxed();
                let shared = fut.shared();
                pending.insert(
                    key.to_string(),
                    PendingEntry {
                        future: shared.clone(),
                        abort,
                        subscribers: 1,
                        created_at: Instant::now(),
                    },
                );

                // Remove the entry once the computation settles. The
                // ptr_eq guard keeps a late watcher from removing a newer
                // entry registered under the same key.
                let inner = Arc::clone(&self.inner);
                let watched_key = key.to_string();
                let watched = shared.clone();
                tokio::spawn(async move {
                    let _ = watched.clone().await;
                    let mut pending = inner.pending.lock().expect("dedup lock poisoned");
                    if let Some(entry) = pending.get(&watched_key) {
                        if entry.future.ptr_eq(&watched) {
                            pending.remove(&watched_key);
                        }
                    }
                });

                shared
            }
        };

        shared.await
    }

    /// Current pending/deduplicated counters.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            pending: self.inner.pending.lock().expect("dedup lock poisoned").len(),
            deduplicated: self.inner.deduplicated.load(Ordering::Relaxed),
        }
    }

    /// Abort every in-flight execution and drop all pending state.
    /// Outstanding waiters observe [`PipelineError::Cancelled`].
    pub fn clear(&self) {
        let entries: Vec<PendingEntry<T>> = {
            let mut pending = self.inner.pending.lock().expect("dedup lock poisoned");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.abort.abort();
        }
    }

    /// Stop the background sweep and cancel all in-flight work.
    /// Safe to call more than once.
    pub fn close(&self) {
        if let Some(handle) = self.sweeper.lock().expect("dedup lock poisoned").take() {
            handle.abort();
        }
        self.clear();
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Deduplicator<T> {
    fn drop(&mut self) {
        self.close();
    }
}
