//! Plan-based limit resolution.
//!
//! Every route category has a base limit. A subscription tier either replaces
//! it outright with a category override or scales its `limit` by the tier's
//! multiplier, leaving the window unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use super::route::RouteCategory;
use super::window::RateLimitConfig;
use crate::error::{Result, TollgateError};

/// Subscription level of an organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

/// Returned when a tier name is not recognised.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown plan tier: {0}")]
pub struct UnknownPlanTier(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(UnknownPlanTier(other.to_string())),
        }
    }
}

impl PlanTier {
    /// Parse a tier name, treating anything unrecognised as the lowest tier.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An organization and its subscription tier, as supplied by billing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationPlan {
    pub organization_id: String,
    pub tier: PlanTier,
}

impl OrganizationPlan {
    pub fn new(organization_id: impl Into<String>, tier: PlanTier) -> Self {
        Self {
            organization_id: organization_id.into(),
            tier,
        }
    }
}

/// Maximum requests per day for an organization.
///
/// In configuration files `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DailyQuota {
    Limited(u64),
    Unlimited,
}

impl TryFrom<i64> for DailyQuota {
    type Error = TollgateError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(DailyQuota::Unlimited),
            n if n > 0 => Ok(DailyQuota::Limited(n as u64)),
            n => Err(TollgateError::Config(format!(
                "daily quota must be positive or -1 for unlimited, got {n}"
            ))),
        }
    }
}

impl From<DailyQuota> for i64 {
    fn from(quota: DailyQuota) -> Self {
        match quota {
            DailyQuota::Limited(n) => i64::try_from(n).unwrap_or(i64::MAX),
            DailyQuota::Unlimited => -1,
        }
    }
}

/// Daily quota of the lowest tier.
const FREE_DAILY_QUOTA: u64 = 1_000;

/// Policy for one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierPolicy {
    /// Factor applied to base limits without an override
    pub multiplier: f64,
    /// Category limits that replace the scaled base limit
    pub overrides: HashMap<RouteCategory, RateLimitConfig>,
    /// Requests per day across all categories
    pub daily_quota: DailyQuota,
}

impl TierPolicy {
    fn new(multiplier: f64, daily_quota: DailyQuota) -> Self {
        Self {
            multiplier,
            overrides: HashMap::new(),
            daily_quota,
        }
    }

    fn merge(&mut self, patch: TierPolicyPatch) {
        if let Some(multiplier) = patch.multiplier {
            self.multiplier = multiplier;
        }
        self.overrides.extend(patch.overrides);
        if let Some(daily_quota) = patch.daily_quota {
            self.daily_quota = daily_quota;
        }
    }
}

/// A tier as written in configuration. Fields left out keep the tier's default.
#[derive(Debug, Deserialize)]
struct TierPolicyPatch {
    multiplier: Option<f64>,
    #[serde(default)]
    overrides: HashMap<RouteCategory, RateLimitConfig>,
    daily_quota: Option<DailyQuota>,
}

/// Per-tier policies.
///
/// Deserializing merges what is given over [`PlanPolicy::default`], field by
/// field, so a file that only tunes `pro` keeps the reference `free` and
/// `enterprise` policies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PlanPolicy {
    pub tiers: HashMap<PlanTier, TierPolicy>,
}

impl<'de> Deserialize<'de> for PlanPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let patches = HashMap::<PlanTier, TierPolicyPatch>::deserialize(deserializer)?;
        let mut policy = PlanPolicy::default();
        for (tier, patch) in patches {
            policy
                .tiers
                .entry(tier)
                .or_insert_with(|| TierPolicy::new(1.0, DailyQuota::Limited(FREE_DAILY_QUOTA)))
                .merge(patch);
        }
        Ok(policy)
    }
}

impl Default for PlanPolicy {
    fn default() -> Self {
        let mut free = TierPolicy::new(1.0, DailyQuota::Limited(FREE_DAILY_QUOTA));
        free.overrides
            .insert(RouteCategory::Ai, RateLimitConfig::per_minute(10));

        let tiers = HashMap::from([
            (PlanTier::Free, free),
            (PlanTier::Pro, TierPolicy::new(3.0, DailyQuota::Limited(10_000))),
            (PlanTier::Enterprise, TierPolicy::new(10.0, DailyQuota::Unlimited)),
        ]);
        Self { tiers }
    }
}

/// Base limit for every route category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryLimits {
    pub api: RateLimitConfig,
    pub auth: RateLimitConfig,
    pub webhook: RateLimitConfig,
    pub ai: RateLimitConfig,
    pub oauth: RateLimitConfig,
}

impl Default for CategoryLimits {
    fn default() -> Self {
        Self {
            api: RateLimitConfig::per_minute(100),
            auth: RateLimitConfig::per_minute(10),
            webhook: RateLimitConfig::per_minute(500),
            ai: RateLimitConfig::per_minute(20),
            oauth: RateLimitConfig::per_minute(20),
        }
    }
}

impl CategoryLimits {
    /// Base limit for `category`.
    pub fn get(&self, category: RouteCategory) -> RateLimitConfig {
        match category {
            RouteCategory::Api => self.api,
            RouteCategory::Auth => self.auth,
            RouteCategory::Webhook => self.webhook,
            RouteCategory::Ai => self.ai,
            RouteCategory::Oauth => self.oauth,
        }
    }
}

/// Resolves the limit that applies to a category for a given tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResolver {
    base: CategoryLimits,
    plans: PlanPolicy,
}

impl PlanResolver {
    /// Create a resolver, rejecting multipliers that are not finite and positive.
    pub fn new(base: CategoryLimits, plans: PlanPolicy) -> Result<Self> {
        for (tier, policy) in &plans.tiers {
            if !policy.multiplier.is_finite() || policy.multiplier <= 0.0 {
                return Err(TollgateError::Config(format!(
                    "plan tier {tier} has invalid multiplier {}",
                    policy.multiplier
                )));
            }
        }
        Ok(Self { base, plans })
    }

    /// Unscaled limit for `category`.
    pub fn base_limit(&self, category: RouteCategory) -> RateLimitConfig {
        self.base.get(category)
    }

    /// Policy for `tier`, falling back to the `free` policy.
    fn policy(&self, tier: PlanTier) -> Option<&TierPolicy> {
        self.plans
            .tiers
            .get(&tier)
            .or_else(|| self.plans.tiers.get(&PlanTier::Free))
    }

    /// Limit for `category` under `tier`.
    ///
    /// A tier override is returned verbatim. Otherwise the base limit is scaled
    /// by the tier multiplier and floored, never below one. A tier without a
    /// policy is treated as `free`, or gets the base limit if that is missing too.
    pub fn effective_limit(&self, category: RouteCategory, tier: PlanTier) -> RateLimitConfig {
        let base = self.base.get(category);
        let Some(policy) = self.policy(tier) else {
            return base;
        };

        if let Some(limit) = policy.overrides.get(&category) {
            return *limit;
        }

        let scaled = (f64::from(base.limit()) * policy.multiplier).floor();
        // Float to int casts saturate, so huge multipliers clamp to u32::MAX.
        base.with_limit(scaled as u32)
    }

    /// Daily quota for `tier`. Tiers without a policy get the `free` quota.
    pub fn daily_quota(&self, tier: PlanTier) -> DailyQuota {
        self.policy(tier)
            .map(|policy| policy.daily_quota)
            .unwrap_or(DailyQuota::Limited(FREE_DAILY_QUOTA))
    }

    /// Longest window among base limits and tier overrides.
    pub fn longest_window_ms(&self) -> u64 {
        let base = RouteCategory::ALL
            .iter()
            .map(|category| self.base.get(*category).window_ms());
        let overrides = self
            .plans
            .tiers
            .values()
            .flat_map(|policy| policy.overrides.values().map(|limit| limit.window_ms()));

        base.chain(overrides).max().unwrap_or(0)
    }
}
