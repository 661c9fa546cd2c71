#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # dripgate
//!
//! Leaky-bucket rate limiting: decide whether a caller may proceed now, how much
//! capacity they have left, and when they will be admitted again.
//!
//! ## Features
//!
//! - **Buckets** with exact, documented leak/fill arithmetic ([`bucket`])
//! - **Evented buckets** that report every leak and fill to injected listeners
//! - **Key resolvers** for anonymous (route + address) and authenticated callers,
//!   with guest/user override strings such as `"30|60"` or `"60|max"`
//! - **Store-backed limiter** with lockouts, TTLs and pluggable storage
//! - **Telemetry** through synchronous dispatchers or tower sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use dripgate::{InMemoryStore, Limiter, RequestContext, RouteSignature, UserResolver};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dripgate::LimiterError> {
//!     let limiter = Limiter::new(InMemoryStore::new());
//!
//!     let request = RequestContext::new()
//!         .with_address(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
//!         .with_route(RouteSignature::new("GET", "/api/items"));
//!     let resolver = UserResolver::with_limits(request, "30|60", "0.5|1", 10)?;
//!
//!     let decision = limiter.attempt(&resolver).await?;
//!     assert!(decision.is_allowed());
//!     assert_eq!(decision.remaining(), 29);
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod resolver;
pub mod store;
pub mod telemetry;

// Re-exports
pub use bucket::{Bucket, BucketSettings, BucketState, EventedBucket, LeakyBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimitSetting, LimiterConfig, LiveConfig, ProfileConfig};
pub use error::LimiterError;
pub use limiter::{Decision, DenyReason, Limiter};
pub use resolver::{
    AddressResolver, Identity, KeyResolver, Limits, RequestContext, RouteSignature,
    StaticIdentity, UserResolver,
};
pub use store::{BucketStore, InMemoryStore};
pub use telemetry::{BucketEvent, Dispatcher, ListenerDispatcher, NullDispatcher};
