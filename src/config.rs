//! Serde-friendly configuration for resolvers and the limiter.
//!
//! A profile is written the way operators write it, e.g. in JSON:
//!
//! ```rust
//! use dripgate::config::ProfileConfig;
//!
//! let profile: ProfileConfig =
//!     serde_json::from_str(r#"{ "max": "30|max", "rate": 0.5 }"#).unwrap();
//! assert_eq!(profile.max.to_string(), "30|max");
//! assert_eq!(profile.rate.to_string(), "0.5");
//! assert_eq!(profile.duration.to_string(), "1");
//! ```

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default bucket capacity.
pub const DEFAULT_MAX: u64 = 60;
/// Default leak rate in drips per second.
pub const DEFAULT_RATE: f64 = 1.0;
/// Default lockout duration in seconds.
pub const DEFAULT_DURATION: u64 = 1;

/// One configured limit: a plain number or an override string such as `"30|60"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitSetting {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for LimitSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitSetting::Integer(v) => write!(f, "{}", v),
            LimitSetting::Float(v) => write!(f, "{}", v),
            LimitSetting::Text(v) => f.write_str(v),
        }
    }
}

impl From<i32> for LimitSetting {
    fn from(v: i32) -> Self {
        LimitSetting::Integer(i64::from(v))
    }
}

impl From<i64> for LimitSetting {
    fn from(v: i64) -> Self {
        LimitSetting::Integer(v)
    }
}

impl From<u32> for LimitSetting {
    fn from(v: u32) -> Self {
        LimitSetting::Integer(i64::from(v))
    }
}

impl From<u64> for LimitSetting {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => LimitSetting::Integer(v),
            Err(_) => LimitSetting::Text(v.to_string()),
        }
    }
}

impl From<f64> for LimitSetting {
    fn from(v: f64) -> Self {
        LimitSetting::Float(v)
    }
}

impl From<&str> for LimitSetting {
    fn from(v: &str) -> Self {
        LimitSetting::Text(v.to_string())
    }
}

impl From<String> for LimitSetting {
    fn from(v: String) -> Self {
        LimitSetting::Text(v)
    }
}

fn default_max() -> LimitSetting {
    LimitSetting::Integer(DEFAULT_MAX as i64)
}

fn default_rate() -> LimitSetting {
    LimitSetting::Float(DEFAULT_RATE)
}

fn default_duration() -> LimitSetting {
    LimitSetting::Integer(DEFAULT_DURATION as i64)
}

/// Guest/user limits for a [`UserResolver`](crate::resolver::UserResolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_max")]
    pub max: LimitSetting,
    #[serde(default = "default_rate")]
    pub rate: LimitSetting,
    #[serde(default = "default_duration")]
    pub duration: LimitSetting,
}

impl ProfileConfig {
    pub fn new(
        max: impl Into<LimitSetting>,
        rate: impl Into<LimitSetting>,
        duration: impl Into<LimitSetting>,
    ) -> Self {
        Self { max: max.into(), rate: rate.into(), duration: duration.into() }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { max: default_max(), rate: default_rate(), duration: default_duration() }
    }
}

/// Settings for a [`Limiter`](crate::limiter::Limiter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Namespace prepended to every store key (`<prefix>:<bucket key>`).
    pub prefix: String,
    /// Extra seconds added to each stored bucket's TTL.
    pub ttl_grace_secs: u64,
    /// Conditional writes retried per attempt before denying with
    /// [`DenyReason::Contention`](crate::limiter::DenyReason::Contention).
    pub contention_retries: u32,
}

impl LimiterConfig {
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { prefix: "dripgate".into(), ttl_grace_secs: 0, contention_retries: 3 }
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Default, Clone)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn ttl_grace_secs(mut self, secs: u64) -> Self {
        self.config.ttl_grace_secs = secs;
        self
    }

    pub fn contention_retries(mut self, retries: u32) -> Self {
        self.config.contention_retries = retries;
        self
    }

    pub fn build(self) -> LimiterConfig {
        self.config
    }
}

/// Limiter settings that can be swapped while requests are in flight.
///
/// Each attempt reads one snapshot, so a change never splits a single decision.
/// Clones share the same settings.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    current: Arc<ArcSwap<LimiterConfig>>,
}

impl LiveConfig {
    pub fn new(config: LimiterConfig) -> Self {
        Self { current: Arc::new(ArcSwap::from_pointee(config)) }
    }

    pub fn get(&self) -> Arc<LimiterConfig> {
        self.current.load_full()
    }

    pub fn set(&self, config: LimiterConfig) {
        self.current.store(Arc::new(config));
    }

    /// Derive new settings from the current ones. Retried if another writer races.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&LimiterConfig) -> LimiterConfig,
    {
        self.current.rcu(|current| Arc::new(f(current)));
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}
