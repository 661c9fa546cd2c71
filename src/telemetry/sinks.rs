//! Asynchronous destinations for bucket events.
//!
//! A sink is any `tower::Service<BucketEvent, Response = ()>`. Bucket operations stay
//! synchronous; [`SinkDispatcher`](super::dispatch::SinkDispatcher) hands each event
//! to [`deliver`] on the tokio runtime.

use super::buffer::{EventBuffer, DEFAULT_CAPACITY};
use super::events::{event_to_json, BucketEvent};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::future::{ready, Ready};
use std::task::{Context, Poll};
use tower::util::MapRequest;
use tower::{Service, ServiceExt};

/// Send one event to `sink`. Failures are logged at debug and otherwise ignored;
/// a slow or broken sink never affects admission.
pub async fn deliver<S>(sink: S, event: BucketEvent)
where
    S: Service<BucketEvent, Response = ()>,
    S::Error: fmt::Display,
{
    let name = event.name();
    let key = event.key().to_string();

    match sink.ready_oneshot().await {
        Ok(mut sink) => {
            if let Err(err) = sink.call(event).await {
                tracing::debug!(event = name, key = %key, error = %err, "bucket event sink failed");
            }
        }
        Err(err) => {
            tracing::debug!(event = name, key = %key, error = %err, "bucket event sink not ready");
        }
    }
}

/// Sink signature produced by [`json_sink`].
pub type JsonSink<S> = MapRequest<S, fn(BucketEvent) -> Value>;

fn to_json(event: BucketEvent) -> Value {
    event_to_json(&event)
}

/// Adapt a service that accepts JSON documents (a log shipper, a queue producer)
/// into a bucket event sink.
pub fn json_sink<S>(inner: S) -> JsonSink<S>
where
    S: Service<Value, Response = ()>,
{
    inner.map_request(to_json as fn(BucketEvent) -> Value)
}

/// Keeps the most recent events in memory. Clones share storage.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: EventBuffer<BucketEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: EventBuffer::with_capacity(capacity) }
    }

    pub fn events(&self) -> Vec<BucketEvent> {
        self.events.snapshot()
    }

    /// Events for one bucket key, oldest first.
    pub fn events_for(&self, key: &str) -> Vec<BucketEvent> {
        self.events.snapshot().into_iter().filter(|event| event.key() == key).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.events.evicted()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<BucketEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BucketEvent) -> Self::Future {
        self.events.push(event);
        ready(Ok(()))
    }
}
