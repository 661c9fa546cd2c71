//! Key-value storage for bucket state.
//!
//! The limiter persists each bucket as JSON between calls. Every single operation
//! must be atomic. [`put_if`](BucketStore::put_if) is the compare-and-set the limiter
//! commits bucket updates with, so concurrent callers never overwrite each other's
//! fills. Distributed backends (Redis, memcached, ...) implement [`BucketStore`]
//! outside this crate, typically with `WATCH`/`MULTI` or a CAS token.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Abstract storage interface for bucket state.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, Self::Error>;

    /// Store a value, replacing any previous one. `ttl` of `None` never expires.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Self::Error>;

    /// Store a value only if the current one equals `expected` (`None`: the key must be
    /// absent or expired). Returns `false`, writing nothing, when another writer got
    /// there first.
    async fn put_if(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        expected: Option<&Value>,
    ) -> Result<bool, Self::Error>;

    /// Atomically add `delta` to an integer value (missing counts as 0) and return the
    /// new value. A `ttl` restarts the entry's expiry; `None` keeps the current one.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, Self::Error>;

    /// Remove a value. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, Self::Error>;
}

#[async_trait]
impl<S: BucketStore + ?Sized> BucketStore for Arc<S> {
    type Error = S::Error;

    async fn get(&self, key: &str) -> Result<Option<Value>, Self::Error> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Self::Error> {
        (**self).put(key, value, ttl).await
    }

    async fn put_if(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        expected: Option<&Value>,
    ) -> Result<bool, Self::Error> {
        (**self).put_if(key, value, ttl, expected).await
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, Self::Error> {
        (**self).increment(key, delta, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        (**self).delete(key).await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>, now: Instant) -> Self {
        Self { value, expires_at: ttl.and_then(|ttl| now.checked_add(ttl)) }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    writes: u64,
}

impl Entries {
    // Expired entries of callers that never come back would otherwise stay forever.
    fn sweep(&mut self, now: Instant) {
        self.writes += 1;
        if self.writes % SWEEP_EVERY == 0 {
            self.map.retain(|_, entry| entry.is_live(now));
        }
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.map.get(key).filter(|entry| entry.is_live(now))
    }
}

const SWEEP_EVERY: u64 = 64;

/// In-process store with TTL support. Clones share the same map.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    entries: Arc<Mutex<Entries>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().map.values().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now. Writes also do this periodically.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.map.len();
        entries.map.retain(|_, entry| entry.is_live(now));
        before - entries.map.len()
    }

    /// Entries held in memory, expired or not.
    pub fn allocated(&self) -> usize {
        self.lock().map.len()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    type Error = std::convert::Infallible;

    async fn get(&self, key: &str) -> Result<Option<Value>, Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.live(key, now) {
            return Ok(Some(entry.value.clone()));
        }
        entries.map.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.sweep(now);
        entries.map.insert(key.to_string(), Entry::new(value, ttl, now));
        Ok(())
    }

    async fn put_if(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        expected: Option<&Value>,
    ) -> Result<bool, Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        let current = entries.live(key, now).map(|entry| &entry.value);
        if current != expected {
            return Ok(false);
        }
        entries.sweep(now);
        entries.map.insert(key.to_string(), Entry::new(value, ttl, now));
        Ok(true)
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.sweep(now);

        let (current, expires_at) = match entries.live(key, now) {
            Some(entry) => (entry.value.as_i64().unwrap_or(0), entry.expires_at),
            None => (0, None),
        };
        let next = current.saturating_add(delta);
        let expires_at = match ttl {
            Some(ttl) => now.checked_add(ttl),
            None => expires_at,
        };
        entries.map.insert(key.to_string(), Entry { value: Value::from(next), expires_at });
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        let now = Instant::now();
        Ok(self.lock().map.remove(key).map_or(false, |entry| entry.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.put("a", json!({ "drips": 3 }), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({ "drips": 3 })));
        assert_eq!(store.len(), 1);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn put_if_commits_only_against_expected_value() {
        let store = InMemoryStore::new();
        let first = json!({ "drips": 1 });
        let second = json!({ "drips": 2 });

        assert!(store.put_if("b", first.clone(), None, None).await.unwrap());
        assert!(!store.put_if("b", second.clone(), None, None).await.unwrap());

        assert!(store.put_if("b", second.clone(), None, Some(&first)).await.unwrap());
        // A writer still holding the stale read loses.
        assert!(!store.put_if("b", json!({ "drips": 9 }), None, Some(&first)).await.unwrap());
        assert_eq!(store.get("b").await.unwrap(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn put_if_treats_expired_as_absent() {
        let store = InMemoryStore::new();
        store.put("b", json!(1), Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(!store.put_if("b", json!(2), None, Some(&json!(1))).await.unwrap());
        assert!(store.put_if("b", json!(2), None, None).await.unwrap());
    }

    #[tokio::test]
    async fn increment_starts_from_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("hits", 1, None).await.unwrap(), 1);
        assert_eq!(store.increment("hits", 4, None).await.unwrap(), 5);
        assert_eq!(store.increment("hits", -2, None).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn increment_ttl_restarts_expiry() {
        let store = InMemoryStore::new();
        store.increment("lockouts", 1, Some(Duration::from_secs(10))).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.increment("lockouts", 1, Some(Duration::from_secs(10))).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("lockouts").await.unwrap(), Some(json!(2)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.get("lockouts").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = InMemoryStore::new();
        store.put("a", json!(1), Some(Duration::from_secs(5))).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.increment("a", 2, None).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let store = InMemoryStore::new();
        for n in 0..SWEEP_EVERY {
            store.put(&format!("once-{n}"), json!(n), Some(Duration::from_secs(1))).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.len(), 0);

        for n in 0..SWEEP_EVERY {
            store.put(&format!("later-{n}"), json!(n), Some(Duration::from_secs(60))).await.unwrap();
        }
        assert_eq!(store.allocated(), SWEEP_EVERY as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries() {
        let store = InMemoryStore::new();
        store.put("short", json!(1), Some(Duration::from_secs(1))).await.unwrap();
        store.put("forever", json!(1), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.allocated(), 1);
    }

    #[tokio::test]
    async fn shared_through_arc() {
        let store = Arc::new(InMemoryStore::new());
        let other = store.clone();
        store.put("k", json!("v"), None).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(json!("v")));
    }
}
