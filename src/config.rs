//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{CategoryLimits, FailurePolicy, PlanPolicy, PlanResolver, RouteRules};

/// Prefix of environment variables that override file settings,
/// e.g. `TOLLGATE_SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// What to do when the window store fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How often stale windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age after which a window is swept, in seconds
    #[serde(default = "default_max_retention")]
    pub max_retention_secs: u64,

    /// Base limit per route category
    #[serde(default)]
    pub categories: CategoryLimits,

    /// Path prefixes per route category
    #[serde(default)]
    pub routes: RouteRules,

    /// Multipliers, overrides and daily quotas per plan tier
    #[serde(default)]
    pub plans: PlanPolicy,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            sweep_interval_secs: default_sweep_interval(),
            max_retention_secs: default_max_retention(),
            categories: CategoryLimits::default(),
            routes: RouteRules::default(),
            plans: PlanPolicy::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_retention() -> u64 {
    3600
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_retention(&self) -> Duration {
        Duration::from_secs(self.max_retention_secs)
    }

    /// Build the plan resolver for these settings.
    pub fn resolver(&self) -> Result<PlanResolver> {
        PlanResolver::new(self.categories.clone(), self.plans.clone())
    }

    /// Check settings that cannot be expressed in their types.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.routes.api_namespace.trim_end_matches('/').is_empty() {
            return Err(TollgateError::Config(
                "routes.api_namespace must not be empty".to_string(),
            ));
        }

        let longest_window_ms = self.resolver()?.longest_window_ms();
        let retention_ms = self.max_retention_secs.saturating_mul(1000);
        if retention_ms < longest_window_ms {
            return Err(TollgateError::Config(format!(
                "max_retention_secs ({}) is shorter than the longest window ({} ms)",
                self.max_retention_secs, longest_window_ms
            )));
        }

        Ok(())
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, then apply environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{DailyQuota, PlanTier, RouteCategory};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.http_addr, default_http_addr());
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Open);
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.rate_limiting.max_retention(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
rate_limiting:
  failure_policy: closed
  sweep_interval_secs: 30
  max_retention_secs: 7200
  categories:
    api:
      limit: 250
      window_ms: 60000
    auth:
      limit: 5
      window_ms: 900000
  plans:
    pro:
      multiplier: 4
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let settings = &config.rate_limiting;

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(settings.failure_policy, FailurePolicy::Closed);
        assert_eq!(settings.sweep_interval_secs, 30);

        let resolver = settings.resolver().unwrap();
        assert_eq!(resolver.effective_limit(RouteCategory::Api, PlanTier::Pro).limit(), 1000);
        assert_eq!(resolver.base_limit(RouteCategory::Auth).window_ms(), 900_000);
        // Categories left out keep their defaults.
        assert_eq!(resolver.base_limit(RouteCategory::Webhook).limit(), 500);
    }

    #[test]
    fn test_partial_plans_keep_other_tier_defaults() {
        let yaml = "rate_limiting:\n  plans:\n    pro:\n      multiplier: 4\n";
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let resolver = config.rate_limiting.resolver().unwrap();

        assert_eq!(resolver.effective_limit(RouteCategory::Api, PlanTier::Pro).limit(), 400);
        assert_eq!(resolver.daily_quota(PlanTier::Pro), DailyQuota::Limited(10_000));
        assert_eq!(resolver.effective_limit(RouteCategory::Api, PlanTier::Enterprise).limit(), 1000);
        assert_eq!(resolver.effective_limit(RouteCategory::Ai, PlanTier::Free).limit(), 10);
        assert_eq!(resolver.daily_quota(PlanTier::Free), DailyQuota::Limited(1000));
    }

    #[test]
    fn test_zero_limit_rejected_at_load() {
        let yaml = r#"
rate_limiting:
  categories:
    api:
      limit: 0
      window_ms: 60000
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_retention_shorter_than_window_rejected() {
        let yaml = r#"
rate_limiting:
  max_retention_secs: 60
  categories:
    auth:
      limit: 5
      window_ms: 900000
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_retention_secs"));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let yaml = "rate_limiting:\n  sweep_interval_secs: 0\n";
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_bad_multiplier_rejected() {
        let yaml = r#"
rate_limiting:
  plans:
    pro:
      multiplier: 0
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "rate_limiting:\n  sweep_interval_secs: 15").unwrap();
        drop(file);

        let config = TollgateConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rate_limiting.sweep_interval_secs, 15);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = Path::new("/nonexistent/tollgate.yaml");
        assert!(matches!(
            TollgateConfig::load(Some(path)),
            Err(TollgateError::Config(_))
        ));
    }
}
