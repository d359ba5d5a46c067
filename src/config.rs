//! Configuration management for Turnstile.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `TURNSTILE_*` environment variables. The binary applies CLI flags last and
//! calls [`TurnstileConfig::validate`] once every layer is in place.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AnonymousPolicy, RateLimitPolicy, DEFAULT_KEY_PREFIX, DEFAULT_LIMIT, DEFAULT_PERIOD_SECS};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// How the HTTP layer answers when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject the request with 503.
    #[default]
    FailClosed,
    /// Let the request through without a quota report.
    FailOpen,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Upper bound on one counter store round trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Behaviour when the counter store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            store_timeout_ms: default_store_timeout_ms(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ServerConfig {
    /// The store timeout as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_store_timeout_ms() -> u64 {
    500
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum requests per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Handling of requests without an identity
    #[serde(default)]
    pub anonymous: AnonymousPolicy,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            period_secs: default_period_secs(),
            key_prefix: default_key_prefix(),
            anonymous: AnonymousPolicy::default(),
        }
    }
}

impl RateLimitingConfig {
    /// Build the validated limiter policy.
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::new(self.limit, self.period_secs)
    }
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_period_secs() -> u64 {
    DEFAULT_PERIOD_SECS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Which counter store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory; limits are not shared between instances
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(TurnstileError::Config(format!(
                "unknown store backend '{}' (expected 'redis' or 'memory')",
                other
            ))),
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis logical database
    #[serde(default)]
    pub db: i64,

    /// Redis password
    #[serde(default)]
    pub password: Option<String>,

    /// Interval between purges of expired in-memory counters, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: None,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl StoreConfig {
    /// Connection URL for the Redis client.
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// The in-memory purge interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_cleanup_interval() -> u64 {
    30
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Override values from `TURNSTILE_*` process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override values using `lookup` to resolve variable names.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TURNSTILE_HTTP_ADDR") {
            self.server.http_addr = parse_var("TURNSTILE_HTTP_ADDR", &value)?;
        }
        if let Some(value) = lookup("TURNSTILE_LIMIT") {
            self.rate_limiting.limit = parse_var("TURNSTILE_LIMIT", &value)?;
        }
        if let Some(value) = lookup("TURNSTILE_PERIOD_SECS") {
            self.rate_limiting.period_secs = parse_var("TURNSTILE_PERIOD_SECS", &value)?;
        }
        if let Some(value) = lookup("TURNSTILE_STORE_BACKEND") {
            self.store.backend = value.parse()?;
        }
        if let Some(value) = lookup("TURNSTILE_REDIS_HOST") {
            self.store.host = value;
        }
        if let Some(value) = lookup("TURNSTILE_REDIS_PORT") {
            self.store.port = parse_var("TURNSTILE_REDIS_PORT", &value)?;
        }
        Ok(())
    }

    /// Check the assembled configuration.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policy()?;

        if self.rate_limiting.key_prefix.trim().is_empty() {
            return Err(TurnstileError::Config(
                "rate_limiting.key_prefix must not be empty".to_string(),
            ));
        }
        if self.server.store_timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "server.store_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.host.trim().is_empty() {
            return Err(TurnstileError::Config(
                "store.host must not be empty".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Memory && self.store.cleanup_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "store.cleanup_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TurnstileError::Config(format!("{} has an invalid value: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr.port(), 5000);
        assert_eq!(config.server.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(config.rate_limiting.limit, 4);
        assert_eq!(config.rate_limiting.period_secs, 10);
        assert_eq!(config.rate_limiting.key_prefix, "rate_limit");
        assert_eq!(config.rate_limiting.anonymous, AnonymousPolicy::Reject);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url(), "redis://localhost:6379/0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:8080
  failure_policy: fail_open
rate_limiting:
  limit: 100
  period_secs: 60
  anonymous: shared
store:
  backend: memory
"#;

        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.server.failure_policy, FailurePolicy::FailOpen);
        assert_eq!(config.server.store_timeout_ms, 500);
        assert_eq!(config.rate_limiting.limit, 100);
        assert_eq!(config.rate_limiting.period_secs, 60);
        assert_eq!(config.rate_limiting.anonymous, AnonymousPolicy::Shared);
        assert_eq!(config.rate_limiting.key_prefix, "rate_limit");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = TurnstileConfig::from_yaml("rate_limiting: [not, a, map]");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_limit_fails_validation() {
        let yaml = "rate_limiting:\n  limit: 0\n";
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.validate(), Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_period_fails_validation() {
        let mut config = TurnstileConfig::default();
        config.rate_limiting.period_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_period_fails_validation() {
        let mut config = TurnstileConfig::default();
        config.rate_limiting.period_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TURNSTILE_LIMIT", "12"),
            ("TURNSTILE_PERIOD_SECS", "30"),
            ("TURNSTILE_REDIS_HOST", "cache.internal"),
            ("TURNSTILE_REDIS_PORT", "6380"),
            ("TURNSTILE_STORE_BACKEND", "Memory"),
        ]
        .into_iter()
        .collect();

        let mut config = TurnstileConfig::default();
        config
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.rate_limiting.limit, 12);
        assert_eq!(config.rate_limiting.period_secs, 30);
        assert_eq!(config.store.host, "cache.internal");
        assert_eq!(config.store.port, 6380);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = TurnstileConfig::default();
        let result = config.apply_env_from(|name| {
            (name == "TURNSTILE_LIMIT").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_redis_url_with_password() {
        let store = StoreConfig {
            password: Some("secret".to_string()),
            db: 2,
            ..StoreConfig::default()
        };
        assert_eq!(store.redis_url(), "redis://:secret@localhost:6379/2");
    }
}
