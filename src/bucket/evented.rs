//! Bucket decorator that reports every leak and fill.

use super::{clamp_fill, sanitize_rate, Bucket, BucketSettings};
use crate::telemetry::{BucketEvent, Dispatcher, NullDispatcher};

/// Wraps a [`Bucket`] and emits `Leaking`/`Leaked` and `Filling`/`Filled` around the
/// inner bucket's mutations.
///
/// Pre-action events go through [`Dispatcher::until`]. A listener response is
/// observational: it is logged, and the mutation proceeds regardless.
#[derive(Debug, Clone)]
pub struct EventedBucket<B, D = NullDispatcher> {
    inner: B,
    events: D,
}

impl<B: Bucket> EventedBucket<B, NullDispatcher> {
    /// Wrap with the no-op dispatcher.
    pub fn silent(inner: B) -> Self {
        Self { inner, events: NullDispatcher }
    }
}

impl<B: Bucket, D: Dispatcher> EventedBucket<B, D> {
    pub fn new(inner: B, events: D) -> Self {
        Self { inner, events }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn dispatcher(&self) -> &D {
        &self.events
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    fn until(&self, event: BucketEvent) {
        if let Some(response) = self.events.until(&event) {
            tracing::debug!(event = %event, response = %response, "listener answered; proceeding");
        }
    }
}

impl<B: Bucket, D: Dispatcher> Bucket for EventedBucket<B, D> {
    fn key(&self) -> &str {
        self.inner.key()
    }

    fn max(&self) -> u64 {
        self.inner.max()
    }

    fn rate(&self) -> f64 {
        self.inner.rate()
    }

    fn drips(&self) -> u64 {
        self.inner.drips()
    }

    fn timer(&self) -> f64 {
        self.inner.timer()
    }

    fn leak(&mut self, rate: Option<f64>) -> &mut Self {
        let rate = sanitize_rate(rate.unwrap_or_else(|| self.inner.rate()));
        self.until(BucketEvent::Leaking { key: self.key().to_string(), rate });

        let before = self.inner.drips();
        self.inner.leak(Some(rate));

        self.events.dispatch(&BucketEvent::Leaked {
            key: self.key().to_string(),
            drips: before.saturating_sub(self.inner.drips()),
            remaining: self.inner.remaining(),
        });
        self
    }

    fn fill(&mut self, drips: i64) -> &mut Self {
        let amount = clamp_fill(drips, self.inner.max());
        self.until(BucketEvent::Filling { key: self.key().to_string(), drips: amount });

        self.inner.fill(i64::try_from(amount).unwrap_or(i64::MAX));

        self.events.dispatch(&BucketEvent::Filled {
            key: self.key().to_string(),
            drips: self.inner.drips(),
            remaining: self.inner.remaining(),
        });
        self
    }

    fn reset(&mut self) -> &mut Self {
        self.inner.reset();
        self
    }

    fn configure(&mut self, settings: BucketSettings) -> &mut Self {
        self.inner.configure(settings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::LeakyBucket;
    use crate::clock::ManualClock;
    use crate::telemetry::{ListenerDispatcher, MemoryDispatcher};
    use serde_json::json;
    use std::sync::Arc;

    fn evented(max: u64) -> (EventedBucket<LeakyBucket, MemoryDispatcher>, ManualClock) {
        let clock = ManualClock::new(100.0);
        let inner = LeakyBucket::new("k", max, 1.0).with_clock(Arc::new(clock.clone()));
        (EventedBucket::new(inner, MemoryDispatcher::new()), clock)
    }

    #[test]
    fn leak_emits_effective_rate_and_dripped_amount() {
        let (mut bucket, clock) = evented(10);
        bucket.fill(8);
        bucket.dispatcher().clear();

        clock.advance(3.0);
        bucket.leak(Some(2.0));

        assert_eq!(
            bucket.dispatcher().events(),
            vec![
                BucketEvent::Leaking { key: "k".into(), rate: 2.0 },
                BucketEvent::Leaked { key: "k".into(), drips: 6, remaining: 8 },
            ]
        );
    }

    #[test]
    fn leak_defaults_to_bucket_rate() {
        let (mut bucket, _clock) = evented(10);
        bucket.leak(None);
        assert_eq!(
            bucket.dispatcher().events()[0],
            BucketEvent::Leaking { key: "k".into(), rate: 1.0 }
        );
    }

    #[test]
    fn leaking_reports_the_rate_actually_applied() {
        let (mut bucket, clock) = evented(10);
        bucket.fill(5);
        bucket.dispatcher().clear();

        clock.advance(3.0);
        bucket.leak(Some(f64::NAN)).leak(Some(-2.0));

        assert_eq!(
            bucket.dispatcher().events(),
            vec![
                BucketEvent::Leaking { key: "k".into(), rate: 0.0 },
                BucketEvent::Leaked { key: "k".into(), drips: 0, remaining: 5 },
                BucketEvent::Leaking { key: "k".into(), rate: 0.0 },
                BucketEvent::Leaked { key: "k".into(), drips: 0, remaining: 5 },
            ]
        );
    }

    #[test]
    fn fill_reports_clamped_request() {
        let (mut bucket, _clock) = evented(5);
        bucket.fill(99);
        assert_eq!(
            bucket.dispatcher().events(),
            vec![
                BucketEvent::Filling { key: "k".into(), drips: 5 },
                BucketEvent::Filled { key: "k".into(), drips: 5, remaining: 0 },
            ]
        );
    }

    #[test]
    fn listener_response_does_not_cancel_fill() {
        let dispatcher = ListenerDispatcher::new().with_listener(|event| match event {
            BucketEvent::Filling { .. } => Some(json!({ "deny": true })),
            _ => None,
        });
        let mut bucket = EventedBucket::new(LeakyBucket::new("k", 3, 1.0), dispatcher);
        bucket.fill(2);
        assert_eq!(bucket.drips(), 2);
    }

    #[test]
    fn silent_wrapper_behaves_like_inner() {
        let mut bucket = EventedBucket::silent(LeakyBucket::new("k", 3, 1.0));
        bucket.fill(3);
        assert!(bucket.is_full());
        bucket.reset();
        assert!(bucket.into_inner().is_empty());
    }
}
