//! Rate limit key derivation.

use axum::http::HeaderMap;

use super::route::RouteCategory;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying the directly connected client address.
pub const REAL_IP: &str = "x-real-ip";
/// Identifier used when no client address can be found.
pub const UNKNOWN_CLIENT: &str = "unknown";

const KEY_PREFIX: &str = "rate_limit";

/// A key that identifies one counter.
///
/// The key is composed of the route category and the caller identifier, so
/// every path in a category shares the same counter for a given caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Key for `identifier` within `category`.
    pub fn new(category: RouteCategory, identifier: &str) -> Self {
        Self(format!("{KEY_PREFIX}:{category}:{identifier}"))
    }

    /// Key for an organization's daily quota.
    pub fn daily(organization_id: &str) -> Self {
        Self(format!("{KEY_PREFIX}:daily:{organization_id}"))
    }

    /// Build the key for a request.
    ///
    /// The authenticated user id is used when present, otherwise the client IP.
    pub fn derive(category: RouteCategory, identity: Option<&str>, headers: &HeaderMap) -> Self {
        match identity.map(str::trim).filter(|id| !id.is_empty()) {
            Some(user_id) => Self::new(category, user_id),
            None => Self::new(category, &client_ip(headers)),
        }
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the client address from request headers.
///
/// Takes the first entry of `X-Forwarded-For`, then `X-Real-IP`, then falls
/// back to `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| header_str(headers, REAL_IP).map(str::trim).filter(|ip| !ip.is_empty()))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::route::RouteRules;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let h = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(client_ip(&h), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let h = headers(&[("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_ip(&h), "198.51.100.4");
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_ip(&h), "198.51.100.4");
    }

    #[test]
    fn test_unknown_client() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_identity_takes_precedence() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        let key = RateLimitKey::derive(RouteCategory::Api, Some("user_42"), &h);
        assert_eq!(key.as_str(), "rate_limit:api:user_42");
    }

    #[test]
    fn test_blank_identity_uses_ip() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        let key = RateLimitKey::derive(RouteCategory::Auth, Some(""), &h);
        assert_eq!(key.to_string(), "rate_limit:auth:203.0.113.7");
    }

    #[test]
    fn test_same_category_paths_share_key() {
        let rules = RouteRules::default();
        let h = headers(&[("x-real-ip", "192.0.2.1")]);

        let first = rules.classify("/api/campaigns").unwrap();
        let second = rules.classify("/api/products/9").unwrap();

        assert_eq!(
            RateLimitKey::derive(first, None, &h),
            RateLimitKey::derive(second, None, &h)
        );
    }

    #[test]
    fn test_categories_namespace_keys() {
        let h = HeaderMap::new();
        assert_ne!(
            RateLimitKey::derive(RouteCategory::Api, Some("u"), &h),
            RateLimitKey::derive(RouteCategory::Ai, Some("u"), &h)
        );
    }

    #[test]
    fn test_daily_key() {
        assert_eq!(RateLimitKey::daily("org_1").as_str(), "rate_limit:daily:org_1");
    }
}
