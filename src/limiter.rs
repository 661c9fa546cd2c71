//! Admission decisions backed by a [`BucketStore`].
//!
//! For each call the [`Limiter`]:
//!
//! 1. asks a [`KeyResolver`] for the caller's key and limits,
//! 2. denies immediately while the caller is locked out,
//! 3. rehydrates the caller's bucket from the store (or starts an empty one),
//! 4. leaks it, then either fills one drip (allowed) or, when full, locks the caller
//!    out for `duration` seconds (denied),
//! 5. commits the bucket with [`BucketStore::put_if`] against the state it read, with
//!    a TTL longer than its drain time.
//!
//! A commit that loses to a concurrent caller starts over from step 3, up to
//! [`LimiterConfig::contention_retries`] times, then denies with
//! [`DenyReason::Contention`]. Bucket events reach the dispatcher only for the
//! attempt that was committed.

use crate::bucket::{Bucket, BucketSettings, BucketState, EventedBucket, LeakyBucket};
use crate::clock::{Clock, SystemClock};
use crate::config::{LimiterConfig, LiveConfig};
use crate::error::LimiterError;
use crate::resolver::{KeyResolver, Limits};
use crate::store::BucketStore;
use crate::telemetry::{Dispatcher, MemoryDispatcher, NullDispatcher};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Suggested wait after losing every commit to concurrent callers.
pub const CONTENTION_BACKOFF: Duration = Duration::from_millis(100);

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The bucket is full and no lockout is configured.
    BucketFull,
    /// The caller is serving a lockout.
    LockedOut,
    /// Concurrent callers kept changing the bucket; nothing was recorded.
    Contention,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::BucketFull => f.write_str("bucket_full"),
            DenyReason::LockedOut => f.write_str("locked_out"),
            DenyReason::Contention => f.write_str("store_contention"),
        }
    }
}

/// The decision returned by the limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Capacity remaining after this request.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
        /// Bucket capacity. Useful for `X-RateLimit-Limit` headers.
        limit: u64,
        /// Time until the bucket has fully drained; `None` when it never leaks.
        reset_after: Option<Duration>,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying.
        /// Useful for `Retry-After` headers. `Duration::MAX` when the bucket never
        /// drains (zero rate).
        wait: Duration,
        reason: DenyReason,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Remaining capacity, zero when denied.
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allowed { remaining, .. } => *remaining,
            Decision::Denied { .. } => 0,
        }
    }
}

// Infinite or out-of-range waits saturate at `Duration::MAX`.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Store-backed leaky-bucket limiter.
pub struct Limiter<S, D = NullDispatcher> {
    store: S,
    events: Arc<D>,
    clock: Arc<dyn Clock>,
    config: LiveConfig,
}

impl<S: BucketStore> Limiter<S, NullDispatcher> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            events: Arc::new(NullDispatcher),
            clock: Arc::new(SystemClock),
            config: LiveConfig::default(),
        }
    }
}

impl<S: BucketStore, D: Dispatcher> Limiter<S, D> {
    /// Send bucket events to `events`.
    pub fn with_dispatcher<E: Dispatcher>(self, events: E) -> Limiter<S, E> {
        Limiter { store: self.store, events: Arc::new(events), clock: self.clock, config: self.config }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_config(self, config: LimiterConfig) -> Self {
        self.config.set(config);
        self
    }

    /// Live configuration handle; updates apply to subsequent calls.
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store key holding the bucket for `key`.
    pub fn bucket_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.get().prefix, key)
    }

    fn timeout_key(&self, key: &str) -> String {
        format!("{}:timeout", self.bucket_key(key))
    }

    fn lockouts_key(&self, key: &str) -> String {
        format!("{}:lockouts", self.bucket_key(key))
    }

    /// Resolve the caller and decide whether one unit of work may proceed.
    pub async fn attempt<R: KeyResolver + ?Sized>(&self, resolver: &R) -> Result<Decision, LimiterError> {
        let key = resolver.key()?;
        let limits = resolver.limits()?;
        self.attempt_key(&key, limits).await
    }

    /// Decide for an explicit key and limits.
    pub async fn attempt_key(&self, key: &str, limits: Limits) -> Result<Decision, LimiterError> {
        let config = self.config.get();
        let now = self.clock.now();

        if let Some(until) = self.locked_until(key).await? {
            if until > now {
                tracing::debug!(key, wait_secs = until - now, "rate_limit_locked_out");
                return Ok(Decision::Denied { wait: seconds(until - now), reason: DenyReason::LockedOut });
            }
        }

        let store_key = self.bucket_key(key);
        for _ in 0..=config.contention_retries {
            let stored = self.store.get(&store_key).await.map_err(LimiterError::store)?;

            // Events are held back until the update is committed.
            let mut bucket =
                EventedBucket::new(self.rehydrate(key, &limits, stored.as_ref())?, MemoryDispatcher::new());
            bucket.leak(None);
            let full = bucket.is_full();
            if !full {
                bucket.fill(1);
            }

            let ttl = bucket_ttl(&bucket, &limits, config.ttl_grace_secs);
            let value = serde_json::to_value(bucket.to_state())?;
            let committed = self
                .store
                .put_if(&store_key, value, ttl, stored.as_ref())
                .await
                .map_err(LimiterError::store)?;
            if !committed {
                tracing::trace!(key, "bucket changed concurrently; retrying");
                continue;
            }
            bucket.dispatcher().replay(self.events.as_ref());

            if full {
                return self.deny_full(key, &bucket, &limits, now, ttl).await;
            }

            let reset_after =
                (bucket.rate() > 0.0).then(|| seconds(bucket.drips() as f64 / bucket.rate()));
            tracing::debug!(key, remaining = bucket.remaining(), "rate_limit_allowed");
            return Ok(Decision::Allowed { remaining: bucket.remaining(), limit: bucket.max(), reset_after });
        }

        tracing::debug!(key, retries = config.contention_retries, "rate_limit_contention");
        Ok(Decision::Denied { wait: CONTENTION_BACKOFF, reason: DenyReason::Contention })
    }

    async fn deny_full<B: Bucket + Sync>(
        &self,
        key: &str,
        bucket: &B,
        limits: &Limits,
        now: f64,
        ttl: Option<Duration>,
    ) -> Result<Decision, LimiterError> {
        let next_drip = if bucket.rate() > 0.0 {
            bucket.timer() + 1.0 / bucket.rate() - now
        } else {
            f64::INFINITY
        };
        let reason = if limits.duration > 0 {
            self.lock_out(key, now, limits.duration, ttl).await?;
            DenyReason::LockedOut
        } else {
            DenyReason::BucketFull
        };

        let wait = seconds(next_drip.max(limits.duration as f64));
        tracing::debug!(key, %reason, wait_ms = wait.as_millis() as u64, "rate_limit_denied");
        Ok(Decision::Denied { wait, reason })
    }

    // Stored drips and timer are kept; capacity and rate always come from `limits`.
    fn rehydrate(&self, key: &str, limits: &Limits, stored: Option<&Value>) -> Result<LeakyBucket, LimiterError> {
        let mut bucket = LeakyBucket::new(key, limits.max, limits.rate).with_clock(self.clock.clone());
        if let Some(value) = stored {
            let state = BucketState::deserialize(value)?;
            bucket.configure(BucketSettings::new().drips(state.drips).timer(state.timer));
        }
        Ok(bucket)
    }

    /// The caller's bucket as persisted, or a fresh one. Current `limits` replace the
    /// stored capacity and rate.
    pub async fn bucket(
        &self,
        key: &str,
        limits: &Limits,
    ) -> Result<EventedBucket<LeakyBucket, Arc<D>>, LimiterError> {
        let stored = self.store.get(&self.bucket_key(key)).await.map_err(LimiterError::store)?;
        let bucket = self.rehydrate(key, limits, stored.as_ref())?;
        Ok(EventedBucket::new(bucket, self.events.clone()))
    }

    /// Overwrite the persisted bucket, e.g. after an administrative reset. Admission
    /// never uses this; it commits conditionally.
    pub async fn save<B: Bucket + Sync>(&self, bucket: &B, limits: &Limits) -> Result<(), LimiterError> {
        let ttl = bucket_ttl(bucket, limits, self.config.get().ttl_grace_secs);
        let value = serde_json::to_value(bucket.to_state())?;
        self.store.put(&self.bucket_key(bucket.key()), value, ttl).await.map_err(LimiterError::store)
    }

    /// UNIX seconds until which `key` is locked out, if a lockout was recorded.
    pub async fn locked_until(&self, key: &str) -> Result<Option<f64>, LimiterError> {
        let stored = self.store.get(&self.timeout_key(key)).await.map_err(LimiterError::store)?;
        Ok(stored.and_then(|value| value.as_f64()))
    }

    /// How many times `key` has been locked out while its bucket was retained.
    pub async fn lockouts(&self, key: &str) -> Result<i64, LimiterError> {
        let stored = self.store.get(&self.lockouts_key(key)).await.map_err(LimiterError::store)?;
        Ok(stored.and_then(|value| value.as_i64()).unwrap_or(0))
    }

    /// Capacity left for `key` right now, without admitting anything.
    pub async fn remaining(&self, key: &str, limits: &Limits) -> Result<u64, LimiterError> {
        let mut bucket = self.bucket(key, limits).await?.into_inner();
        Ok(bucket.leak(None).remaining())
    }

    /// Forget everything stored for `key`.
    pub async fn clear(&self, key: &str) -> Result<(), LimiterError> {
        for store_key in [self.bucket_key(key), self.timeout_key(key), self.lockouts_key(key)] {
            self.store.delete(&store_key).await.map_err(LimiterError::store)?;
        }
        Ok(())
    }

    // The counter lives as long as the bucket it describes.
    async fn lock_out(
        &self,
        key: &str,
        now: f64,
        duration: u64,
        ttl: Option<Duration>,
    ) -> Result<(), LimiterError> {
        let until = now + duration as f64;
        self.store
            .put(&self.timeout_key(key), Value::from(until), Some(Duration::from_secs(duration)))
            .await
            .map_err(LimiterError::store)?;
        let count =
            self.store.increment(&self.lockouts_key(key), 1, ttl).await.map_err(LimiterError::store)?;
        tracing::info!(key, until, lockouts = count, "rate_limit_lockout");
        Ok(())
    }
}

/// Full drain time plus the lockout and grace; `None` when the bucket never drains.
fn bucket_ttl<B: Bucket + ?Sized>(bucket: &B, limits: &Limits, grace: u64) -> Option<Duration> {
    (bucket.rate() > 0.0).then(|| {
        let drain = (bucket.max() as f64 / bucket.rate()).ceil() as u64;
        Duration::from_secs(drain.saturating_add(limits.duration).saturating_add(grace))
    })
}

impl<S: fmt::Debug, D> fmt::Debug for Limiter<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("config", &self.config.get())
            .finish()
    }
}
