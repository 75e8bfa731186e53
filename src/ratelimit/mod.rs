//! Rate limiting logic and state management.

mod key;
mod limiter;
pub mod plan;
mod route;
mod store;
mod window;

pub use key::{client_ip, RateLimitKey};
pub use limiter::{Decision, FailurePolicy, RateLimiter, RequestContext};
pub use plan::{CategoryLimits, DailyQuota, OrganizationPlan, PlanPolicy, PlanResolver, PlanTier};
pub use route::{RouteCategory, RouteRules};
pub use store::{MemoryStore, Sweeper, WindowStore};
pub use window::{Clock, ManualClock, RateLimitConfig, RateLimitResult, SystemClock, WindowEntry};
