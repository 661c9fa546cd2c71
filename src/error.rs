//! Error types for buckets, resolvers and the limiter.

/// Message reported when a request has no route to derive a signature from.
pub const SIGNATURE_UNAVAILABLE: &str =
    "Unable to generate the request signature. Route unavailable.";

/// Unified error type for the rate limiter.
#[derive(thiserror::Error, Debug)]
pub enum LimiterError {
    /// No route/operation context was available to key an anonymous bucket.
    #[error("Unable to generate the request signature. Route unavailable.")]
    SignatureUnavailable,
    /// An override string contained a token that is neither a number nor a property name.
    #[error("invalid {field} override {value:?}")]
    InvalidOverride {
        /// Which parameter was being configured (`max`, `rate` or `duration`).
        field: &'static str,
        /// The offending override string.
        value: String,
    },
    /// The resolved identity does not expose a property named by an override.
    #[error("identity has no numeric property {property:?} for {field}")]
    MissingProperty {
        /// Which parameter was being resolved.
        field: &'static str,
        /// The property name read from the override.
        property: String,
    },
    /// The identity's property is not usable for the parameter, e.g. a fractional or
    /// negative capacity.
    #[error("identity property {property:?} = {value} is not a valid {field}")]
    InvalidProperty {
        field: &'static str,
        property: String,
        value: f64,
    },
    /// The backing store failed. The limiter does not retry.
    #[error("store unavailable: {0}")]
    Store(String),
    /// Persisted bucket state could not be encoded or decoded.
    #[error("bucket state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LimiterError {
    /// Wrap any store adapter error.
    pub fn store<E: std::error::Error>(err: E) -> Self {
        Self::Store(err.to_string())
    }

    /// Check if this error is due to a missing route signature
    pub fn is_signature_unavailable(&self) -> bool {
        matches!(self, Self::SignatureUnavailable)
    }

    /// Check if this error is a configuration problem (bad override or unusable property)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidOverride { .. } | Self::MissingProperty { .. } | Self::InvalidProperty { .. }
        )
    }

    /// Check if this error came from the store
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
