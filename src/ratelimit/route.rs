//! Route classification.
//!
//! Maps a request path to the category whose limits apply to it. Matching is
//! on path prefixes only; query strings and fragments are ignored. A prefix
//! matches whole segments, so `/api/ai` covers `/api/ai/summary` but not
//! `/api/aim`.

use serde::{Deserialize, Serialize};

/// Coarse endpoint class used to select a rate limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    /// Any other endpoint under the API namespace
    Api,
    /// Login, signup and password reset pages plus the auth API
    Auth,
    /// Inbound webhooks and background job triggers
    Webhook,
    /// AI and task generation endpoints
    Ai,
    /// OAuth flow endpoints
    Oauth,
}

impl RouteCategory {
    /// All categories, in declaration order.
    pub const ALL: [RouteCategory; 5] = [
        RouteCategory::Api,
        RouteCategory::Auth,
        RouteCategory::Webhook,
        RouteCategory::Ai,
        RouteCategory::Oauth,
    ];

    /// Name used in keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteCategory::Api => "api",
            RouteCategory::Auth => "auth",
            RouteCategory::Webhook => "webhook",
            RouteCategory::Ai => "ai",
            RouteCategory::Oauth => "oauth",
        }
    }
}

impl std::fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path prefixes for each category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRules {
    /// Prefix of the API namespace; anything below it is at least `api`
    pub api_namespace: String,
    /// AI and task generation endpoints
    pub ai: Vec<String>,
    /// Webhook and job trigger endpoints
    pub webhook: Vec<String>,
    /// OAuth flow endpoints
    pub oauth: Vec<String>,
    /// Auth pages and auth API endpoints
    pub auth: Vec<String>,
    /// Prefixes of static assets, never metered
    pub static_prefixes: Vec<String>,
    /// File extensions of static assets, never metered
    pub static_extensions: Vec<String>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            api_namespace: "/api".to_string(),
            ai: owned(&["/api/ai", "/api/generate", "/api/tasks/generate"]),
            webhook: owned(&["/api/webhooks", "/api/trigger", "/api/cron", "/api/inngest"]),
            oauth: owned(&["/api/oauth", "/api/integrations/oauth"]),
            auth: owned(&[
                "/login",
                "/signup",
                "/forgot-password",
                "/reset-password",
                "/api/auth",
            ]),
            static_prefixes: owned(&["/_next", "/static", "/favicon.ico"]),
            static_extensions: owned(&[
                "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "css", "js", "map", "woff",
                "woff2", "ttf", "txt",
            ]),
        }
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl RouteRules {
    /// Classify a path. `None` means the path is not rate limited.
    ///
    /// Specific categories are tried before the generic `api` fallback since
    /// most of them live under the API namespace too.
    pub fn classify(&self, path: &str) -> Option<RouteCategory> {
        let path = strip_query(path);

        if self.is_static(path) {
            return None;
        }

        let ordered = [
            (RouteCategory::Ai, &self.ai),
            (RouteCategory::Webhook, &self.webhook),
            (RouteCategory::Oauth, &self.oauth),
            (RouteCategory::Auth, &self.auth),
        ];
        for (category, prefixes) in ordered {
            if prefixes.iter().any(|prefix| has_prefix(path, prefix)) {
                return Some(category);
            }
        }

        if has_prefix(path, &self.api_namespace) {
            return Some(RouteCategory::Api);
        }

        None
    }

    fn is_static(&self, path: &str) -> bool {
        if self
            .static_prefixes
            .iter()
            .any(|prefix| has_prefix(path, prefix))
        {
            return true;
        }

        // Dotted segments under the API namespace are resource names.
        if has_prefix(path, &self.api_namespace) {
            return false;
        }

        let last_segment = path.rsplit('/').next().unwrap_or_default();
        match last_segment.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => self
                .static_extensions
                .iter()
                .any(|ext| ext.eq_ignore_ascii_case(extension)),
            _ => false,
        }
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Segment-aware prefix match.
fn has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(path: &str) -> Option<RouteCategory> {
        RouteRules::default().classify(path)
    }

    #[test]
    fn test_named_paths() {
        assert_eq!(classify("/api/ai/generate"), Some(RouteCategory::Ai));
        assert_eq!(classify("/login"), Some(RouteCategory::Auth));
        assert_eq!(classify("/_next/static/chunk.js"), None);
        assert_eq!(classify("/api/webhooks/resend"), Some(RouteCategory::Webhook));
    }

    #[test]
    fn test_specific_categories_win_over_api() {
        assert_eq!(classify("/api/tasks/generate"), Some(RouteCategory::Ai));
        assert_eq!(classify("/api/trigger"), Some(RouteCategory::Webhook));
        assert_eq!(classify("/api/oauth/google/callback"), Some(RouteCategory::Oauth));
        assert_eq!(classify("/api/auth/session"), Some(RouteCategory::Auth));
        assert_eq!(classify("/api/campaigns/42"), Some(RouteCategory::Api));
        assert_eq!(classify("/api"), Some(RouteCategory::Api));
    }

    #[test]
    fn test_auth_pages() {
        for page in ["/login", "/signup", "/forgot-password", "/reset-password/token"] {
            assert_eq!(classify(page), Some(RouteCategory::Auth), "{page}");
        }
    }

    #[test]
    fn test_pages_outside_api_are_unmetered() {
        assert_eq!(classify("/"), None);
        assert_eq!(classify("/dashboard/campaigns"), None);
        assert_eq!(classify("/apiary"), None);
        assert_eq!(classify("/loginx"), None);
    }

    #[test]
    fn test_static_assets_are_unmetered() {
        assert_eq!(classify("/favicon.ico"), None);
        assert_eq!(classify("/static/logo.svg"), None);
        assert_eq!(classify("/images/hero.PNG"), None);
    }

    #[test]
    fn test_dotted_api_paths_stay_metered() {
        assert_eq!(classify("/api/media/upload.json"), Some(RouteCategory::Api));
        assert_eq!(classify("/api/.well-known"), Some(RouteCategory::Api));
        assert_eq!(classify("/api/exports/report.css"), Some(RouteCategory::Api));
        assert_eq!(classify("/api/media/avatar.png"), Some(RouteCategory::Api));
        assert_eq!(classify("/api/ai/render.js"), Some(RouteCategory::Ai));
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        assert_eq!(classify("/api/aim"), Some(RouteCategory::Api));
        assert_eq!(classify("/api/ai"), Some(RouteCategory::Ai));
        assert_eq!(classify("/api/webhooksx"), Some(RouteCategory::Api));
    }

    #[test]
    fn test_query_string_is_ignored() {
        assert_eq!(classify("/api/ai/generate?model=fast"), Some(RouteCategory::Ai));
        assert_eq!(classify("/login?next=/api/ai"), Some(RouteCategory::Auth));
        assert_eq!(classify("/about?page=/api/x"), None);
    }

    #[test]
    fn test_classification_is_repeatable() {
        let rules = RouteRules::default();
        for path in ["/api/ai/generate", "/login", "/x", "/api/cron/daily"] {
            assert_eq!(rules.classify(path), rules.classify(path));
        }
    }

    #[test]
    fn test_custom_rules_from_yaml() {
        let yaml = r#"
api_namespace: /v1
ai:
  - /v1/llm
"#;
        let rules: RouteRules = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.classify("/v1/llm/complete"), Some(RouteCategory::Ai));
        assert_eq!(rules.classify("/v1/contacts"), Some(RouteCategory::Api));
        assert_eq!(rules.classify("/api/contacts"), None);
        // Unlisted fields keep their defaults.
        assert_eq!(rules.classify("/login"), Some(RouteCategory::Auth));
    }

    #[test]
    fn test_category_names() {
        let names: Vec<String> = RouteCategory::ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["api", "auth", "webhook", "ai", "oauth"]);
    }
}
