//! In-memory LRU request cache.

use bytes::Bytes;
use feed_core::{RequestSignature, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Cache entry with insertion time for TTL-based invalidation.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Bytes,
    inserted_at: Instant,
}

impl CacheEntry {
    fn new(payload: Bytes) -> Self {
        Self {
            payload,
            inserted_at: Instant::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// One shared fetch. Whoever initializes the cell runs the fetch, everybody
/// else waits on it.
type Flight = Arc<OnceCell<Result<Bytes>>>;

#[derive(Debug, Default)]
struct Inner {
    // None when the capacity is zero.
    entries: Option<LruCache<RequestSignature, CacheEntry>>,
    in_flight: HashMap<RequestSignature, Flight>,
}

impl Inner {
    fn lookup(&mut self, signature: &RequestSignature, ttl: Option<Duration>) -> Option<Bytes> {
        let entries = self.entries.as_mut()?;
        match entries.get(signature) {
            Some(entry) if !ttl.is_some_and(|ttl| entry.is_stale(ttl)) => {
                return Some(entry.payload.clone());
            }
            Some(_) => {}
            None => return None,
        }
        entries.pop(signature);
        None
    }

    /// Stores a payload, returning true if another entry was evicted.
    fn store(&mut self, signature: RequestSignature, payload: Bytes) -> bool {
        let Some(entries) = self.entries.as_mut() else {
            return false;
        };
        match entries.push(signature.clone(), CacheEntry::new(payload)) {
            Some((evicted, _)) => evicted != signature,
            None => false,
        }
    }
}

/// Counters describing cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a stored entry.
    pub hits: u64,
    /// Lookups that found no usable entry.
    pub misses: u64,
    /// Fetch functions actually invoked.
    pub fetches: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

/// Bounded LRU cache of raw responses keyed by [`RequestSignature`].
///
/// Concurrent callers missing on the same signature share one fetch: the fetch
/// function runs once and every waiter receives its result. Failed fetches are
/// handed to the waiters of that flight but never stored.
#[derive(Debug)]
pub struct RequestCache {
    inner: Mutex<Inner>,
    ttl: Option<Duration>,
    counters: Counters,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new(512)
    }
}

impl RequestCache {
    /// Creates a cache holding at most `capacity` responses.
    ///
    /// A capacity of zero stores nothing but still deduplicates concurrent
    /// requests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                in_flight: HashMap::new(),
            }),
            ttl: None,
            counters: Counters::default(),
        }
    }

    /// Treats entries older than `ttl` as missing.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Returns the stored payload or runs `fetch` to produce it.
    ///
    /// `fetch` runs at most once per signature across all concurrent callers.
    #[instrument(skip(self, fetch), fields(signature = %signature))]
    pub async fn get_or_fetch<F, Fut>(&self, signature: &RequestSignature, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let flight = {
            let mut inner = self.inner.lock();
            if let Some(payload) = inner.lookup(signature, self.ttl) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit");
                return Ok(payload);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss");
            Arc::clone(inner.in_flight.entry(signature.clone()).or_default())
        };

        self.run_flight(signature, &flight, fetch).await
    }

    /// Runs `fetch` (sharing any flight already in progress) and overwrites the
    /// stored entry with its result.
    #[instrument(skip(self, fetch), fields(signature = %signature))]
    pub async fn refresh<F, Fut>(&self, signature: &RequestSignature, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let flight = {
            let mut inner = self.inner.lock();
            Arc::clone(inner.in_flight.entry(signature.clone()).or_default())
        };

        self.run_flight(signature, &flight, fetch).await
    }

    async fn run_flight<F, Fut>(
        &self,
        signature: &RequestSignature,
        flight: &Flight,
        fetch: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let result = flight
            .get_or_init(|| async move {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                fetch().await
            })
            .await
            .clone();

        let mut inner = self.inner.lock();
        let owns_flight = inner
            .in_flight
            .get(signature)
            .is_some_and(|current| Arc::ptr_eq(current, flight));

        // The first waiter to get here retires the flight and stores its result.
        if owns_flight {
            inner.in_flight.remove(signature);
            if let Ok(payload) = &result {
                if inner.store(signature.clone(), payload.clone()) {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("Evicted least recently used entry");
                }
            }
        }

        result
    }

    /// Returns the stored payload without fetching.
    #[must_use]
    pub fn get(&self, signature: &RequestSignature) -> Option<Bytes> {
        self.inner.lock().lookup(signature, self.ttl)
    }

    /// Stores a payload directly.
    pub fn put(&self, signature: RequestSignature, payload: Bytes) {
        if self.inner.lock().store(signature, payload) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes the entry for one signature, returning true if it existed.
    pub fn invalidate(&self, signature: &RequestSignature) -> bool {
        let removed = self
            .inner
            .lock()
            .entries
            .as_mut()
            .and_then(|entries| entries.pop(signature))
            .is_some();
        if removed {
            debug!(signature = %signature, "Invalidated cache entry");
        }
        removed
    }

    /// Removes entries older than `ttl`, returning how many were dropped.
    pub fn invalidate_stale(&self, ttl: Duration) -> usize {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.entries.as_mut() else {
            return 0;
        };

        let stale: Vec<RequestSignature> = entries
            .iter()
            .filter(|(_, entry)| entry.is_stale(ttl))
            .map(|(signature, _)| signature.clone())
            .collect();
        for signature in &stale {
            entries.pop(signature);
        }

        if !stale.is_empty() {
            debug!("Invalidated {} stale cache entries", stale.len());
        }
        stale.len()
    }

    /// Drops every stored entry. Flights in progress are unaffected.
    pub fn clear(&self) {
        if let Some(entries) = self.inner.lock().entries.as_mut() {
            entries.clear();
        }
        debug!("Cleared all cache entries");
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of stored entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .entries
            .as_ref()
            .map_or(0, |entries| entries.cap().get())
    }

    /// Number of fetches currently in progress.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
