use serde_json::json;
use std::fmt;

/// Lifecycle events emitted around bucket mutations.
///
/// `Leaking` and `Filling` are dispatched before the mutation with
/// "until first non-null response" semantics; `Leaked` and `Filled` are fired to
/// every listener after it.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketEvent {
    /// The bucket is about to leak.
    Leaking {
        /// Bucket key
        key: String,
        /// Effective rate used for this leak (drips per second)
        rate: f64,
    },
    /// The bucket leaked.
    Leaked {
        /// Bucket key
        key: String,
        /// Number of drips that leaked out
        drips: u64,
        /// Capacity remaining after the leak
        remaining: u64,
    },
    /// The bucket is about to be filled.
    Filling {
        /// Bucket key
        key: String,
        /// Requested amount, already clamped into `[0, max]`
        drips: u64,
    },
    /// The bucket was filled.
    Filled {
        /// Bucket key
        key: String,
        /// Fill level after the fill
        drips: u64,
        /// Capacity remaining after the fill
        remaining: u64,
    },
}

impl BucketEvent {
    /// Key of the bucket the event belongs to.
    pub fn key(&self) -> &str {
        match self {
            BucketEvent::Leaking { key, .. }
            | BucketEvent::Leaked { key, .. }
            | BucketEvent::Filling { key, .. }
            | BucketEvent::Filled { key, .. } => key,
        }
    }

    /// Event name as listeners know it.
    pub fn name(&self) -> &'static str {
        match self {
            BucketEvent::Leaking { .. } => "Leaking",
            BucketEvent::Leaked { .. } => "Leaked",
            BucketEvent::Filling { .. } => "Filling",
            BucketEvent::Filled { .. } => "Filled",
        }
    }

    /// True for the pre-action events (`Leaking`, `Filling`).
    pub fn is_pre_action(&self) -> bool {
        matches!(self, BucketEvent::Leaking { .. } | BucketEvent::Filling { .. })
    }
}

impl fmt::Display for BucketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketEvent::Leaking { key, rate } => write!(f, "Leaking({}, rate={})", key, rate),
            BucketEvent::Leaked { key, drips, remaining } => {
                write!(f, "Leaked({}, drips={}, remaining={})", key, drips, remaining)
            }
            BucketEvent::Filling { key, drips } => write!(f, "Filling({}, drips={})", key, drips),
            BucketEvent::Filled { key, drips, remaining } => {
                write!(f, "Filled({}, drips={}, remaining={})", key, drips, remaining)
            }
        }
    }
}

/// Convert a BucketEvent into a JSON value for sinks.
pub fn event_to_json(event: &BucketEvent) -> serde_json::Value {
    match event {
        BucketEvent::Leaking { key, rate } => json!({
            "kind": "leaking",
            "key": key,
            "rate": *rate,
        }),
        BucketEvent::Leaked { key, drips, remaining } => json!({
            "kind": "leaked",
            "key": key,
            "drips": *drips,
            "remaining": *remaining,
        }),
        BucketEvent::Filling { key, drips } => json!({
            "kind": "filling",
            "key": key,
            "drips": *drips,
        }),
        BucketEvent::Filled { key, drips, remaining } => json!({
            "kind": "filled",
            "key": key,
            "drips": *drips,
            "remaining": *remaining,
        }),
    }
}
