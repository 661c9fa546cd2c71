use super::buffer::{EventBuffer, DEFAULT_CAPACITY};
use super::events::BucketEvent;
use super::sinks::deliver;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tower::Service;

/// Value a listener may return from a pre-action event.
pub type ListenerResponse = serde_json::Value;

/// A synchronous listener registered on a [`ListenerDispatcher`].
pub type Listener = Arc<dyn Fn(&BucketEvent) -> Option<ListenerResponse> + Send + Sync>;

/// Receives bucket lifecycle events.
///
/// Two dispatch modes are required:
/// - [`until`](Dispatcher::until) calls listeners in registration order and stops at
///   the first non-null response, returning it;
/// - [`dispatch`](Dispatcher::dispatch) fires the event at every listener.
pub trait Dispatcher: Send + Sync {
    /// Dispatch until the first non-null listener response.
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse>;

    /// Fire-and-forget to all listeners.
    fn dispatch(&self, event: &BucketEvent);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse> {
        (**self).until(event)
    }

    fn dispatch(&self, event: &BucketEvent) {
        (**self).dispatch(event)
    }
}

/// Discards every event. The default dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDispatcher;

impl Dispatcher for NullDispatcher {
    fn until(&self, _event: &BucketEvent) -> Option<ListenerResponse> {
        None
    }

    fn dispatch(&self, _event: &BucketEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse> {
        tracing::info!(event = %event, key = event.key(), "bucket_event");
        None
    }

    fn dispatch(&self, event: &BucketEvent) {
        tracing::info!(event = %event, key = event.key(), "bucket_event");
    }
}

/// Calls registered closures in registration order.
#[derive(Clone, Default)]
pub struct ListenerDispatcher {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it sees every event after those registered before it.
    pub fn listen<F>(&self, listener: F)
    where
        F: Fn(&BucketEvent) -> Option<ListenerResponse> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    /// Builder-style [`listen`](Self::listen).
    pub fn with_listener<F>(self, listener: F) -> Self
    where
        F: Fn(&BucketEvent) -> Option<ListenerResponse> + Send + Sync + 'static,
    {
        self.listen(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    // Listeners run outside the lock so they may register further listeners.
    fn snapshot(&self) -> Vec<Listener> {
        self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl std::fmt::Debug for ListenerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerDispatcher").field("listeners", &self.len()).finish()
    }
}

impl Dispatcher for ListenerDispatcher {
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse> {
        self.snapshot()
            .iter()
            .filter_map(|listener| listener(event))
            .find(|response| !response.is_null())
    }

    fn dispatch(&self, event: &BucketEvent) {
        for listener in self.snapshot() {
            let _ = listener(event);
        }
    }
}

/// How an event reached a [`MemoryDispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Until,
    Dispatch,
}

/// Records events in memory, bounded by `capacity`.
///
/// Besides inspection in tests, a recording can be [`replay`](Self::replay)ed into
/// another dispatcher once the caller knows the recorded mutations took effect.
#[derive(Clone, Debug)]
pub struct MemoryDispatcher {
    records: EventBuffer<(DispatchMode, BucketEvent)>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: EventBuffer::with_capacity(capacity) }
    }

    /// Recorded events in arrival order.
    pub fn events(&self) -> Vec<BucketEvent> {
        self.records.snapshot().into_iter().map(|(_, event)| event).collect()
    }

    /// Recorded events along with the mode they were dispatched with.
    pub fn records(&self) -> Vec<(DispatchMode, BucketEvent)> {
        self.records.snapshot()
    }

    pub fn clear(&self) {
        self.records.drain();
    }

    /// Move every recorded event into `target`, in order and with its original mode.
    pub fn replay<D: Dispatcher + ?Sized>(&self, target: &D) {
        for (mode, event) in self.records.drain() {
            match mode {
                DispatchMode::Until => {
                    if let Some(response) = target.until(&event) {
                        tracing::debug!(event = %event, response = %response, "listener answered replayed event");
                    }
                }
                DispatchMode::Dispatch => target.dispatch(&event),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.records.evicted()
    }
}

impl Default for MemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for MemoryDispatcher {
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse> {
        self.records.push((DispatchMode::Until, event.clone()));
        None
    }

    fn dispatch(&self, event: &BucketEvent) {
        self.records.push((DispatchMode::Dispatch, event.clone()));
    }
}

/// Forwards events to an asynchronous sink (any `tower::Service<BucketEvent>`)
/// without blocking the bucket.
///
/// Each event is spawned onto the current tokio runtime. Outside a runtime the event
/// is dropped and counted. Sinks never answer pre-action events, so `until` always
/// yields `None`.
#[derive(Clone, Debug)]
pub struct SinkDispatcher<S> {
    sink: S,
    dropped: Arc<AtomicU64>,
}

impl<S> SinkDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Events dropped because no tokio runtime was available.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S> SinkDispatcher<S>
where
    S: Service<BucketEvent, Response = ()> + Clone + Send + Sync + 'static,
    S::Error: fmt::Display + Send + 'static,
    S::Future: Send + 'static,
{
    fn forward(&self, event: &BucketEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(deliver(self.sink.clone(), event.clone()));
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(event = %event, "no runtime; bucket event dropped");
            }
        }
    }
}

impl<S> Dispatcher for SinkDispatcher<S>
where
    S: Service<BucketEvent, Response = ()> + Clone + Send + Sync + 'static,
    S::Error: fmt::Display + Send + 'static,
    S::Future: Send + 'static,
{
    fn until(&self, event: &BucketEvent) -> Option<ListenerResponse> {
        self.forward(event);
        None
    }

    fn dispatch(&self, event: &BucketEvent) {
        self.forward(event);
    }
}
