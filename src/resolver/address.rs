use super::{KeyResolver, RequestContext};
use crate::config::{DEFAULT_DURATION, DEFAULT_MAX, DEFAULT_RATE};
use crate::error::LimiterError;

/// Resolves anonymous callers by route signature and network address.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    context: RequestContext,
    max: u64,
    rate: f64,
    duration: u64,
}

impl AddressResolver {
    pub fn new(context: RequestContext) -> Self {
        Self { context, max: DEFAULT_MAX, rate: DEFAULT_RATE, duration: DEFAULT_DURATION }
    }

    pub fn with_limits(context: RequestContext, max: u64, rate: f64, duration: u64) -> Self {
        Self { context, max, rate: rate.max(0.0), duration }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl KeyResolver for AddressResolver {
    fn key(&self) -> Result<String, LimiterError> {
        self.context.signature()
    }

    fn max(&self) -> Result<u64, LimiterError> {
        Ok(self.max)
    }

    fn rate(&self) -> Result<f64, LimiterError> {
        Ok(self.rate)
    }

    fn duration(&self) -> Result<u64, LimiterError> {
        Ok(self.duration)
    }
}
