//! Key resolution: who is calling, and which limits apply to them.
//!
//! A [`KeyResolver`] turns a [`RequestContext`] into the bucket key and the
//! `{max, rate, duration}` triple for that caller:
//!
//! - [`AddressResolver`] keys anonymous callers by route signature and address.
//! - [`UserResolver`] keys authenticated callers by a SHA-1 of their identifier and
//!   merges a guest profile with a user profile (see [`Override`]).

use crate::error::LimiterError;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

pub mod address;
pub mod limit;
pub mod user;

pub use address::AddressResolver;
pub use limit::{LimitValue, Override, UserValue};
pub use user::{UserResolver, UserResolverFn};

/// The route or operation a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSignature {
    pub method: String,
    pub domain: Option<String>,
    pub path: String,
}

impl RouteSignature {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self { method: method.into(), domain: None, path: path.into() }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

impl fmt::Display for RouteSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.method, self.domain.as_deref().unwrap_or(""), self.path)
    }
}

/// What the host knows about a request when asking for a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub address: Option<IpAddr>,
    pub route: Option<RouteSignature>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_route(mut self, route: RouteSignature) -> Self {
        self.route = Some(route);
        self
    }

    /// Opaque key for an anonymous caller on this route.
    pub fn signature(&self) -> Result<String, LimiterError> {
        let route = self.route.as_ref().ok_or(LimiterError::SignatureUnavailable)?;
        let address = self.address.map(|a| a.to_string()).unwrap_or_default();
        Ok(sha1_hex(format!("{}|{}", route, address)))
    }
}

/// An authenticated caller.
pub trait Identity: Send + Sync {
    /// Stable unique identifier (user id, email, API key id, ...).
    fn identifier(&self) -> String;

    /// Numeric property used by `"<guest>|<property>"` overrides.
    fn property(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// Identity backed by a fixed identifier and property map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticIdentity {
    identifier: String,
    properties: HashMap<String, f64>,
}

impl StaticIdentity {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), properties: HashMap::new() }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: f64) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

impl Identity for StaticIdentity {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }
}

/// Effective limits for one caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Bucket capacity.
    pub max: u64,
    /// Drips leaked per second.
    pub rate: f64,
    /// Lockout in seconds once the bucket is full.
    pub duration: u64,
}

/// Derives a bucket key and its limits from a caller's request.
pub trait KeyResolver: Send + Sync {
    fn key(&self) -> Result<String, LimiterError>;

    fn max(&self) -> Result<u64, LimiterError>;

    fn rate(&self) -> Result<f64, LimiterError>;

    fn duration(&self) -> Result<u64, LimiterError>;

    fn limits(&self) -> Result<Limits, LimiterError> {
        Ok(Limits { max: self.max()?, rate: self.rate()?, duration: self.duration()? })
    }
}

/// Lowercase hex SHA-1 digest.
pub fn sha1_hex(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_ref());
    hex::encode(hasher.finalize())
}
