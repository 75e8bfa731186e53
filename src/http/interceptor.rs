//! Request interceptor.
//!
//! Runs once per inbound request, ahead of authentication and routing. A
//! denied request gets its 429 straight away and never reaches the inner
//! service; an allowed one is forwarded and its response picks up the
//! informational rate limit headers on the way out.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::{info, instrument};

use super::response::apply_reset_header;
use crate::ratelimit::{Decision, OrganizationPlan, RateLimiter, RequestContext, WindowStore};

/// Authenticated user id, inserted into request extensions by whatever layer
/// resolved the session. Absent for anonymous callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// Install the interceptor on every route of `router`.
pub fn protect<S: WindowStore>(router: Router, limiter: Arc<RateLimiter<S>>) -> Router {
    router.layer(middleware::from_fn_with_state(limiter, rate_limit::<S>))
}

/// The interceptor itself, for use with `axum::middleware::from_fn_with_state`.
#[instrument(
    skip_all,
    fields(path = %request.uri().path())
)]
pub async fn rate_limit<S: WindowStore>(
    State(limiter): State<Arc<RateLimiter<S>>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let identity = request
        .extensions()
        .get::<CallerIdentity>()
        .map(|caller| caller.0.clone());
    let organization = request.extensions().get::<OrganizationPlan>().cloned();

    let context = RequestContext::new(&path, &headers)
        .with_identity(identity.as_deref())
        .with_plan(organization.as_ref().map(|org| org.tier));

    let decision = limiter.check_rate_limit(&context).await;
    if let Some(denied) = decision.deny_response() {
        info!(path = %path, "Rejected request over its rate limit");
        return denied;
    }

    // Also runs when a window store failure let the request through.
    if let (Some(organization), Some(_)) = (&organization, limiter.classify(&path)) {
        let quota = limiter.check_daily_quota(organization).await;
        if let Some(denied) = quota.deny_response() {
            info!(
                path = %path,
                organization = %organization.organization_id,
                "Rejected request over its daily quota"
            );
            return denied;
        }
    }

    let mut response = next.run(request).await;

    if let Decision::Allowed(result) = decision {
        limiter
            .decorate_response(&context, response.headers_mut())
            .await;
        apply_reset_header(response.headers_mut(), result.reset_at);
    }

    response
}
