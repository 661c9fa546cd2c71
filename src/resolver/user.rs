use super::limit::Override;
use super::{sha1_hex, Identity, KeyResolver, RequestContext};
use crate::config::{LimitSetting, ProfileConfig, DEFAULT_DURATION, DEFAULT_MAX, DEFAULT_RATE};
use crate::error::LimiterError;
use std::sync::Arc;

/// Looks up the authenticated caller for a request, if any.
pub type UserResolverFn =
    Arc<dyn Fn(&RequestContext) -> Option<Arc<dyn Identity>> + Send + Sync>;

/// Resolves authenticated callers, falling back to anonymous resolution for guests.
///
/// Each of `max`, `rate` and `duration` is an [`Override`], so guests and users can
/// be limited differently, and a user's own properties can carry custom limits:
///
/// ```rust
/// use dripgate::resolver::{KeyResolver, RequestContext, StaticIdentity, UserResolver};
/// use std::sync::Arc;
///
/// let resolver = UserResolver::with_limits(RequestContext::new(), "60|max", "1|rate", 1)?
///     .with_user_resolver(|_| {
///         Some(Arc::new(StaticIdentity::new("premium").with_property("max", 500.0)) as _)
///     });
/// assert_eq!(resolver.max()?, 500);
/// # Ok::<_, dripgate::LimiterError>(())
/// ```
#[derive(Clone)]
pub struct UserResolver {
    context: RequestContext,
    max: Override<u64>,
    rate: Override<f64>,
    duration: Override<u64>,
    user_resolver: Option<UserResolverFn>,
}

impl UserResolver {
    /// Resolver with the default limits (60 drips, 1 drip/s, 1 s lockout).
    pub fn new(context: RequestContext) -> Self {
        Self {
            context,
            max: Override::Uniform(DEFAULT_MAX),
            rate: Override::Uniform(DEFAULT_RATE),
            duration: Override::Uniform(DEFAULT_DURATION),
            user_resolver: None,
        }
    }

    /// Resolver with explicit limits; every override is parsed here so a bad one fails
    /// before the first request is limited.
    pub fn with_limits(
        context: RequestContext,
        max: impl Into<LimitSetting>,
        rate: impl Into<LimitSetting>,
        duration: impl Into<LimitSetting>,
    ) -> Result<Self, LimiterError> {
        Self::from_config(context, &ProfileConfig::new(max, rate, duration))
    }

    pub fn from_config(context: RequestContext, profile: &ProfileConfig) -> Result<Self, LimiterError> {
        Ok(Self {
            context,
            max: Override::from_setting("max", &profile.max)?,
            rate: Override::from_setting("rate", &profile.rate)?,
            duration: Override::from_setting("duration", &profile.duration)?,
            user_resolver: None,
        })
    }

    /// Attach the function that finds the authenticated caller.
    pub fn set_user_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&RequestContext) -> Option<Arc<dyn Identity>> + Send + Sync + 'static,
    {
        self.user_resolver = Some(Arc::new(resolver));
    }

    pub fn with_user_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<Arc<dyn Identity>> + Send + Sync + 'static,
    {
        self.set_user_resolver(resolver);
        self
    }

    /// The authenticated caller, if a user resolver is attached and finds one.
    pub fn user(&self) -> Option<Arc<dyn Identity>> {
        self.user_resolver.as_ref().and_then(|resolve| resolve(&self.context))
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl std::fmt::Debug for UserResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserResolver")
            .field("context", &self.context)
            .field("max", &self.max)
            .field("rate", &self.rate)
            .field("duration", &self.duration)
            .field("user_resolver", &self.user_resolver.is_some())
            .finish()
    }
}

impl KeyResolver for UserResolver {
    fn key(&self) -> Result<String, LimiterError> {
        match self.user() {
            Some(user) => Ok(sha1_hex(user.identifier())),
            None => self.context.signature(),
        }
    }

    fn max(&self) -> Result<u64, LimiterError> {
        self.max.resolve("max", self.user().as_deref())
    }

    fn rate(&self) -> Result<f64, LimiterError> {
        self.rate.resolve("rate", self.user().as_deref())
    }

    fn duration(&self) -> Result<u64, LimiterError> {
        self.duration.resolve("duration", self.user().as_deref())
    }

    fn limits(&self) -> Result<super::Limits, LimiterError> {
        let user = self.user();
        let user = user.as_deref();
        Ok(super::Limits {
            max: self.max.resolve("max", user)?,
            rate: self.rate.resolve("rate", user)?,
            duration: self.duration.resolve("duration", user)?,
        })
    }
}
