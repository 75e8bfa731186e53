//! Core rate limiter implementation.
//!
//! Ties the pieces together: classify the path, derive the key, resolve the
//! limit and check it against the window store.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::key::RateLimitKey;
use super::plan::{DailyQuota, OrganizationPlan, PlanResolver, PlanTier};
use super::route::{RouteCategory, RouteRules};
use super::store::WindowStore;
use super::window::{remaining, Clock, RateLimitConfig, RateLimitResult, SystemClock};
use crate::config::RateLimitingConfig;
use crate::error::{Result, TollgateError};
use crate::http::response::{self, RateLimitExceeded};

/// What to do when the window store itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let the request through
    #[default]
    Open,
    /// Reject the request as if it were over its limit
    Closed,
}

/// The parts of an inbound request the limiter looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Request path, optionally with a query string
    pub path: &'a str,
    /// Request headers, used to find the client address
    pub headers: &'a HeaderMap,
    /// Authenticated user id, if already known
    pub identity: Option<&'a str>,
    /// Subscription tier of the caller's organization, if known
    pub plan: Option<PlanTier>,
}

impl<'a> RequestContext<'a> {
    pub fn new(path: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            path,
            headers,
            identity: None,
            plan: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<&'a str>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_plan(mut self, plan: Option<PlanTier>) -> Self {
        self.plan = plan;
        self
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The path is not rate limited, or the check was skipped
    Unmetered,
    /// Within the limit
    Allowed(RateLimitResult),
    /// Over the limit
    Denied(RateLimitResult),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied(_))
    }

    /// The window result, if a check was made.
    pub fn result(&self) -> Option<&RateLimitResult> {
        match self {
            Decision::Unmetered => None,
            Decision::Allowed(result) | Decision::Denied(result) => Some(result),
        }
    }

    /// The 429 response for a denial.
    pub fn deny_response(&self) -> Option<Response> {
        match self {
            Decision::Denied(result) => Some(RateLimitExceeded(*result).into_response()),
            _ => None,
        }
    }
}

/// The rate limiter facade.
///
/// Counters live in `store`; daily organization quotas are kept apart in
/// `quota_store` so their 24-hour windows do not dictate how long ordinary
/// windows are retained.
pub struct RateLimiter<S: WindowStore> {
    store: Arc<S>,
    quota_store: Arc<S>,
    rules: RouteRules,
    resolver: PlanResolver,
    failure_policy: FailurePolicy,
    clock: Arc<dyn Clock>,
}

impl<S: WindowStore> RateLimiter<S> {
    /// Create a limiter that fails open.
    pub fn new(store: Arc<S>, quota_store: Arc<S>, rules: RouteRules, resolver: PlanResolver) -> Self {
        Self {
            store,
            quota_store,
            rules,
            resolver,
            failure_policy: FailurePolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a limiter from validated settings.
    pub fn from_config(store: Arc<S>, quota_store: Arc<S>, settings: &RateLimitingConfig) -> Result<Self> {
        let limiter = Self::new(store, quota_store, settings.routes.clone(), settings.resolver()?)
            .with_failure_policy(settings.failure_policy);
        Ok(limiter)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Clock used to compute the reset time of fail-closed denials.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Category of `path`, `None` if it is not rate limited.
    pub fn classify(&self, path: &str) -> Option<RouteCategory> {
        self.rules.classify(path)
    }

    /// Limit for `category`, scaled for `plan` when one is known.
    pub fn limit_for(&self, category: RouteCategory, plan: Option<PlanTier>) -> RateLimitConfig {
        match plan {
            Some(tier) => self.resolver.effective_limit(category, tier),
            None => self.resolver.base_limit(category),
        }
    }

    /// Key a request is counted under, `None` for unmetered paths.
    pub fn key_for(&self, request: &RequestContext<'_>) -> Option<RateLimitKey> {
        self.classify(request.path)
            .map(|category| RateLimitKey::derive(category, request.identity, request.headers))
    }

    /// Count the request and decide whether it may proceed.
    ///
    /// An allowed request gets no response here; its headers are added later
    /// by [`decorate_response`](Self::decorate_response) so it is counted once.
    pub async fn check_rate_limit(&self, request: &RequestContext<'_>) -> Decision {
        let Some(category) = self.classify(request.path) else {
            trace!(path = %request.path, "Path is not rate limited");
            return Decision::Unmetered;
        };

        let key = RateLimitKey::derive(category, request.identity, request.headers);
        let config = self.limit_for(category, request.plan);

        trace!(
            key = %key,
            limit = config.limit(),
            window_ms = config.window_ms(),
            "Checking rate limit"
        );

        self.check_key(&self.store, &key, config).await
    }

    /// Count the request against the organization's daily quota.
    pub async fn check_daily_quota(&self, organization: &OrganizationPlan) -> Decision {
        let DailyQuota::Limited(quota) = self.resolver.daily_quota(organization.tier) else {
            return Decision::Unmetered;
        };

        let key = RateLimitKey::daily(&organization.organization_id);
        let config = RateLimitConfig::per_day(u32::try_from(quota).unwrap_or(u32::MAX));

        trace!(
            key = %key,
            tier = %organization.tier,
            quota = quota,
            "Checking daily quota"
        );

        self.check_key(&self.quota_store, &key, config).await
    }

    /// Set `X-RateLimit-Limit` and `X-RateLimit-Remaining` from the current
    /// count, without counting anything. Unmetered paths are left alone.
    pub async fn decorate_response(&self, request: &RequestContext<'_>, headers: &mut HeaderMap) {
        let Some(category) = self.classify(request.path) else {
            return;
        };

        let key = RateLimitKey::derive(category, request.identity, request.headers);
        let config = self.limit_for(category, request.plan);

        match self.store.get(&key).await {
            Ok(count) => {
                response::apply_limit_headers(headers, config.limit(), remaining(config.limit(), count));
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read rate limit count for response headers");
            }
        }
    }

    /// Clear the counter for `key`.
    pub async fn reset(&self, key: &RateLimitKey) -> Result<()> {
        self.store.reset(key).await
    }

    async fn check_key(&self, store: &Arc<S>, key: &RateLimitKey, config: RateLimitConfig) -> Decision {
        match store.check(key, config).await {
            Ok(result) if result.success => Decision::Allowed(result),
            Ok(result) => {
                debug!(
                    key = %key,
                    limit = result.limit,
                    retry_after = result.retry_after,
                    "Rate limit exceeded"
                );
                Decision::Denied(result)
            }
            Err(e) => self.on_store_failure(key, config, e),
        }
    }

    fn on_store_failure(&self, key: &RateLimitKey, config: RateLimitConfig, error: TollgateError) -> Decision {
        match self.failure_policy {
            FailurePolicy::Open => {
                warn!(key = %key, error = %error, "Window store failed, allowing request");
                Decision::Unmetered
            }
            FailurePolicy::Closed => {
                warn!(key = %key, error = %error, "Window store failed, rejecting request");
                let window_end = self.clock.now_ms().saturating_add(config.window_ms());
                Decision::Denied(RateLimitResult {
                    success: false,
                    limit: config.limit(),
                    remaining: 0,
                    reset_at: window_end.div_ceil(1000),
                    retry_after: Some(config.window_ms().div_ceil(1000)),
                })
            }
        }
    }
}
