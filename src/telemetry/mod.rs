//! Bucket lifecycle events and how they reach listeners.
//!
//! Buckets wrapped in [`EventedBucket`](crate::bucket::EventedBucket) emit:
//!
//! - **Before a mutation**: `Leaking`, `Filling`, dispatched with
//!   [`Dispatcher::until`] (stop at the first non-null listener response)
//! - **After a mutation**: `Leaked`, `Filled`, dispatched with
//!   [`Dispatcher::dispatch`] (every listener)
//!
//! Dispatchers are synchronous because bucket operations are. Asynchronous consumers
//! are plain `tower::Service<BucketEvent>`s attached through [`SinkDispatcher`];
//! [`json_sink`] adapts services that take JSON documents.

mod buffer;
pub mod dispatch;
pub mod events;
pub mod sinks;

pub use dispatch::{
    DispatchMode, Dispatcher, Listener, ListenerDispatcher, ListenerResponse, LogDispatcher,
    MemoryDispatcher, NullDispatcher, SinkDispatcher,
};
pub use events::{event_to_json, BucketEvent};
pub use sinks::{deliver, json_sink, JsonSink, MemorySink};
