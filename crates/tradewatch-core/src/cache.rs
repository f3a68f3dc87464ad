//! In-memory TTL cache with concurrent-fetch de-duplication.
//!
//! Expiry is checked at read time, so an entry is never returned once its TTL
//! has elapsed even if no sweep has run. [`CacheStore::get_or_fetch`] collapses
//! concurrent misses on the same key into a single upstream fetch whose outcome
//! (success or failure) is shared with every waiting caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where a [`Fetched`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// A live cache entry.
    Cache,
    /// This caller ran the fetch.
    Upstream,
    /// Another caller's concurrent fetch.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    pub value: V,
    pub origin: CacheOrigin,
}

impl<V> Fetched<V> {
    fn new(value: V, origin: CacheOrigin) -> Self {
        Self { value, origin }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Stored entries, including expired ones not yet purged.
    pub size: usize,
    pub expired: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

type Outcome<V, E> = Option<Result<V, E>>;
type InFlight<V, E> = HashMap<String, Arc<watch::Sender<Outcome<V, E>>>>;

enum Role<V, E> {
    Leader(Arc<watch::Sender<Outcome<V, E>>>),
    Follower(watch::Receiver<Outcome<V, E>>),
}

/// Thread-safe TTL cache shared across concurrent analysis calls.
pub struct CacheStore<V, E> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<InFlight<V, E>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V, E> Default for CacheStore<V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> CacheStore<V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live value, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.lookup(key);
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Store `value` for `ttl`. A zero TTL stores nothing.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        if ttl.is_zero() {
            self.write_entries().remove(&key);
            return;
        }

        self.write_entries().insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Return the live value for `key`, or run `fetch` exactly once across all
    /// concurrent callers missing on the same key.
    ///
    /// Successful results are stored for `ttl`; failures are shared with the
    /// waiting callers but never cached. If the fetching caller is cancelled,
    /// one of the waiters takes over.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Fetched<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut counted = false;
        let sender = loop {
            if let Some(value) = self.lookup(key) {
                if !counted {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                return Ok(Fetched::new(value, CacheOrigin::Cache));
            }
            if !counted {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counted = true;
            }

            match self.join_or_lead(key) {
                Role::Leader(sender) => break sender,
                Role::Follower(mut receiver) => {
                    if let Some(outcome) = wait_for_outcome(&mut receiver).await {
                        return outcome.map(|value| Fetched::new(value, CacheOrigin::Coalesced));
                    }
                    debug!(key, "in-flight fetch abandoned, taking over");
                }
            }
        };

        let _guard = InFlightGuard {
            store: self,
            key,
            sender: Arc::clone(&sender),
        };

        // A previous leader may have stored the value between our miss and registration.
        if let Some(value) = self.lookup(key) {
            sender.send_replace(Some(Ok(value.clone())));
            return Ok(Fetched::new(value, CacheOrigin::Cache));
        }

        let outcome = fetch().await;
        if let Ok(value) = &outcome {
            self.insert(key, value.clone(), ttl);
        }
        sender.send_replace(Some(outcome.clone()));
        outcome.map(|value| Fetched::new(value, CacheOrigin::Upstream))
    }

    /// Remove every entry and reset the counters. Returns the stats as they were.
    pub fn clear(&self) -> CacheStats {
        let mut entries = self.write_entries();
        let stats = Self::stats_of(&entries, &self.hits, &self.misses);
        entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        stats
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        Self::stats_of(&self.read_entries(), &self.hits, &self.misses)
    }

    /// Number of stored entries, including expired ones.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.read_entries()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn join_or_lead(&self, key: &str) -> Role<V, E> {
        let mut in_flight = self.lock_in_flight();
        if let Some(sender) = in_flight.get(key) {
            return Role::Follower(sender.subscribe());
        }

        let (sender, _) = watch::channel(None);
        let sender = Arc::new(sender);
        in_flight.insert(key.to_owned(), Arc::clone(&sender));
        Role::Leader(sender)
    }

    fn stats_of(
        entries: &HashMap<String, CacheEntry<V>>,
        hits: &AtomicU64,
        misses: &AtomicU64,
    ) -> CacheStats {
        let now = Instant::now();
        CacheStats {
            hits: hits.load(Ordering::Relaxed),
            misses: misses.load(Ordering::Relaxed),
            size: entries.len(),
            expired: entries.values().filter(|entry| !entry.is_live(now)).count(),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("cache entry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("cache entry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlight<V, E>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| {
            warn!("cache in-flight lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Releases the per-key in-flight marker on every exit path, including cancellation.
struct InFlightGuard<'a, V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    store: &'a CacheStore<V, E>,
    key: &'a str,
    sender: Arc<watch::Sender<Outcome<V, E>>>,
}

impl<V, E> Drop for InFlightGuard<'_, V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn drop(&mut self) {
        let mut in_flight = self.store.lock_in_flight();
        let ours = in_flight
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.sender));
        if ours {
            in_flight.remove(self.key);
        }
    }
}

/// `None` means the leader went away without publishing an outcome.
async fn wait_for_outcome<V: Clone, E: Clone>(
    receiver: &mut watch::Receiver<Outcome<V, E>>,
) -> Option<Result<V, E>> {
    loop {
        if let Some(outcome) = receiver.borrow_and_update().clone() {
            return Some(outcome);
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().clone();
        }
    }
}
