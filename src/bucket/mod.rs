//! Leaky buckets.
//!
//! A bucket holds up to `max` drips. Admitted work [`fill`](Bucket::fill)s it and
//! elapsed time [`leak`](Bucket::leak)s it at `rate` drips per second. A full bucket
//! means the caller is over its limit.
//!
//! Behaviour is layered by composition: [`LeakyBucket`] does the arithmetic and
//! [`EventedBucket`] wraps any [`Bucket`] to emit lifecycle events.
//!
//! # Arithmetic
//!
//! Drips are whole numbers while rate and elapsed time are fractional. A leak removes
//! `floor(elapsed × rate)` drips and carries the unconverted remainder forward in the
//! timer, so frequent short-interval calls lose no recovery time. Fills saturate at
//! `max`.
//!
//! ```rust
//! use dripgate::bucket::{Bucket, LeakyBucket};
//! use dripgate::clock::ManualClock;
//! use std::sync::Arc;
//!
//! let clock = ManualClock::new(1_000.0);
//! let mut bucket = LeakyBucket::new("caller", 60, 1.0).with_clock(Arc::new(clock.clone()));
//! bucket.fill(60);
//! assert!(bucket.is_full());
//!
//! clock.advance(10.0);
//! bucket.leak(None);
//! assert_eq!(bucket.drips(), 50);
//! assert_eq!(bucket.remaining(), 10);
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::LimiterError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod evented;
pub use evented::EventedBucket;

/// Serialized form of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub key: String,
    pub max: u64,
    pub rate: f64,
    pub drips: u64,
    /// UNIX seconds from which the next leak is measured. A leak that empties the
    /// bucket, a zero-rate leak and a reset set it to now; any other leak advances it
    /// only by the whole drips removed, so it may trail the last leak by less than one
    /// drip interval.
    pub timer: f64,
}

/// Partial settings applied with [`Bucket::configure`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSettings {
    pub max: Option<u64>,
    pub rate: Option<f64>,
    pub drips: Option<u64>,
    pub timer: Option<f64>,
}

impl BucketSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn drips(mut self, drips: u64) -> Self {
        self.drips = Some(drips);
        self
    }

    pub fn timer(mut self, timer: f64) -> Self {
        self.timer = Some(timer);
        self
    }
}

impl From<BucketState> for BucketSettings {
    fn from(state: BucketState) -> Self {
        Self {
            max: Some(state.max),
            rate: Some(state.rate),
            drips: Some(state.drips),
            timer: Some(state.timer),
        }
    }
}

/// Common interface of every bucket variant.
pub trait Bucket {
    /// Identity of the bucket.
    fn key(&self) -> &str;

    /// Capacity.
    fn max(&self) -> u64;

    /// Drips leaked per second.
    fn rate(&self) -> f64;

    /// Current fill level.
    fn drips(&self) -> u64;

    /// UNIX seconds from which the next leak is measured. Trails the last leak by the
    /// fraction of a drip interval that has not yet produced a whole drip.
    fn timer(&self) -> f64;

    /// Leak drips for the time elapsed since the timer, at `rate` or the bucket's own rate.
    fn leak(&mut self, rate: Option<f64>) -> &mut Self;

    /// Add drips. The amount is clamped into `[0, max]` and the level saturates at `max`.
    fn fill(&mut self, drips: i64) -> &mut Self;

    /// Empty the bucket and restart the timer.
    fn reset(&mut self) -> &mut Self;

    /// Apply bulk settings, e.g. when rehydrating from a store.
    fn configure(&mut self, settings: BucketSettings) -> &mut Self;

    fn is_full(&self) -> bool {
        self.drips() == self.max()
    }

    fn is_empty(&self) -> bool {
        self.drips() == 0
    }

    /// Capacity left before the bucket is full.
    fn remaining(&self) -> u64 {
        self.max().saturating_sub(self.drips())
    }

    fn to_state(&self) -> BucketState {
        BucketState {
            key: self.key().to_string(),
            max: self.max(),
            rate: self.rate(),
            drips: self.drips(),
            timer: self.timer(),
        }
    }

    fn to_json(&self) -> Result<String, LimiterError> {
        Ok(serde_json::to_string(&self.to_state())?)
    }
}

/// Clamp a requested fill into `[0, max]`.
pub fn clamp_fill(drips: i64, max: u64) -> u64 {
    u64::try_from(drips).map_or(0, |drips| drips.min(max))
}

// Negative, NaN and infinite rates leak nothing.
pub(crate) fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        0.0
    }
}

/// The plain leaky bucket.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    key: String,
    max: u64,
    rate: f64,
    drips: u64,
    timer: f64,
    clock: Arc<dyn Clock>,
}

impl LeakyBucket {
    /// Fresh, empty bucket timed by the system clock.
    pub fn new(key: impl Into<String>, max: u64, rate: f64) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self { key: key.into(), max, rate: sanitize_rate(rate), drips: 0, timer: clock.now(), clock }
    }

    /// Swap the clock and restart the timer from it. Use before the first operation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.timer = clock.now();
        self.clock = clock;
        self
    }

    /// Rehydrate a bucket from persisted state.
    pub fn from_state(state: BucketState, clock: Arc<dyn Clock>) -> Self {
        let mut bucket = Self::new(state.key.clone(), state.max, state.rate).with_clock(clock);
        bucket.configure(state.into());
        bucket
    }

    /// Rehydrate a bucket from its JSON form.
    pub fn from_json(json: &str, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        Ok(Self::from_state(serde_json::from_str(json)?, clock))
    }
}

impl Default for LeakyBucket {
    fn default() -> Self {
        Self::new("default", 60, 1.0)
    }
}

impl Bucket for LeakyBucket {
    fn key(&self) -> &str {
        &self.key
    }

    fn max(&self) -> u64 {
        self.max
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn drips(&self) -> u64 {
        self.drips
    }

    fn timer(&self) -> f64 {
        self.timer
    }

    fn leak(&mut self, rate: Option<f64>) -> &mut Self {
        let rate = sanitize_rate(rate.unwrap_or(self.rate));
        let now = self.clock.now();
        let elapsed = (now - self.timer).max(0.0);
        let leaked = (elapsed * rate).floor();

        if rate == 0.0 || self.drips == 0 {
            self.timer = now;
        } else if leaked >= self.drips as f64 {
            self.drips = 0;
            self.timer = now;
        } else {
            self.drips -= leaked as u64;
            // Keep the time that did not add up to a whole drip.
            self.timer = now - (elapsed - leaked / rate).max(0.0);
        }

        tracing::trace!(key = %self.key, leaked, drips = self.drips, "bucket_leak");
        self
    }

    fn fill(&mut self, drips: i64) -> &mut Self {
        let amount = clamp_fill(drips, self.max);
        self.drips = self.drips.saturating_add(amount).min(self.max);
        tracing::trace!(key = %self.key, amount, drips = self.drips, "bucket_fill");
        self
    }

    fn reset(&mut self) -> &mut Self {
        self.drips = 0;
        self.timer = self.clock.now();
        self
    }

    fn configure(&mut self, settings: BucketSettings) -> &mut Self {
        if let Some(max) = settings.max {
            self.max = max;
        }
        if let Some(rate) = settings.rate {
            self.rate = sanitize_rate(rate);
        }
        if let Some(timer) = settings.timer {
            self.timer = timer;
        }
        if let Some(drips) = settings.drips {
            self.drips = drips;
        }
        self.drips = self.drips.min(self.max);
        self
    }
}
