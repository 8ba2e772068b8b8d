//! Security pipeline configuration
//!
//! Thresholds and toggles are environment-level inputs, not code. Defaults
//! are production values; [`SecurityConfig::development`] relaxes them for
//! local work, and [`SecurityConfig::from_env`] overlays `REVIO_*` variables
//! on the defaults.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::{
    abuse::AbuseConfig,
    limiter::{RateLimitPolicy, SlowDownPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Strict,
    Lax,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Apply the stricter auth/sensitive rate-limit tiers.
    pub strict_rate_limit: bool,
    pub brute_force_protection: bool,
    pub ip_blacklist: bool,
    pub cookie_secure: bool,
    pub cookie_same_site: CookieSameSite,
    pub allowed_origins: Vec<String>,
    /// Include internal failure detail in 500 bodies. Never set in
    /// production.
    pub expose_error_detail: bool,
    /// Bound on identity-provider round-trips.
    pub provider_timeout: StdDuration,
    /// Bound on user-store round-trips.
    pub store_timeout: StdDuration,
    /// Cadence of the abuse-state sweep task.
    pub sweep_interval: StdDuration,
    pub abuse: AbuseConfig,
    pub global_limit: RateLimitPolicy,
    pub auth_limit: RateLimitPolicy,
    pub sensitive_limit: RateLimitPolicy,
    pub slow_down: SlowDownPolicy,
}

impl Default for SecurityConfig {
    /// Production defaults:
    ///
    /// - Global tier: 300 requests / minute
    /// - Auth tier: 20 requests / 15 minutes
    /// - Sensitive tier (password reset, signup): 5 requests / hour
    /// - Brute force: 5 failures / 15 minutes, blacklist past score 20
    /// - Sweep: every 5 minutes
    fn default() -> Self {
        Self {
            strict_rate_limit: true,
            brute_force_protection: true,
            ip_blacklist: true,
            cookie_secure: true,
            cookie_same_site: CookieSameSite::Strict,
            allowed_origins: Vec::new(),
            expose_error_detail: false,
            provider_timeout: StdDuration::from_secs(10),
            store_timeout: StdDuration::from_secs(5),
            sweep_interval: StdDuration::from_secs(300),
            abuse: AbuseConfig::default(),
            global_limit: RateLimitPolicy::new("global", 300, Duration::minutes(1)),
            auth_limit: RateLimitPolicy::new("auth", 20, Duration::minutes(15)),
            sensitive_limit: RateLimitPolicy::new("sensitive", 5, Duration::hours(1)),
            slow_down: SlowDownPolicy::default(),
        }
    }
}

impl SecurityConfig {
    /// Relaxed configuration for local development: permissive limits,
    /// insecure cookies, error detail exposed.
    pub fn development() -> Self {
        Self {
            strict_rate_limit: false,
            cookie_secure: false,
            cookie_same_site: CookieSameSite::Lax,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            expose_error_detail: true,
            auth_limit: RateLimitPolicy::new("auth", 300, Duration::minutes(1)),
            sensitive_limit: RateLimitPolicy::new("sensitive", 300, Duration::minutes(1)),
            ..Self::default()
        }
    }

    /// Overlay `REVIO_*` environment variables on the production defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.strict_rate_limit = env_bool("REVIO_STRICT_RATE_LIMIT", config.strict_rate_limit);
        config.brute_force_protection =
            env_bool("REVIO_BRUTE_FORCE_PROTECTION", config.brute_force_protection);
        config.ip_blacklist = env_bool("REVIO_IP_BLACKLIST", config.ip_blacklist);
        config.cookie_secure = env_bool("REVIO_COOKIE_SECURE", config.cookie_secure);
        config.expose_error_detail =
            env_bool("REVIO_EXPOSE_ERROR_DETAIL", config.expose_error_detail);

        if let Ok(value) = std::env::var("REVIO_COOKIE_SAMESITE") {
            config.cookie_same_site = match value.to_ascii_lowercase().as_str() {
                "lax" => CookieSameSite::Lax,
                _ => CookieSameSite::Strict,
            };
        }

        if let Ok(value) = std::env::var("REVIO_ALLOWED_ORIGINS") {
            config.allowed_origins = value
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }

        config.abuse.enabled = config.brute_force_protection;
        config
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_are_strict() {
        let config = SecurityConfig::default();
        assert!(config.strict_rate_limit);
        assert!(config.cookie_secure);
        assert!(!config.expose_error_detail);
        assert!(config.auth_limit.max_requests < config.global_limit.max_requests);
        assert!(config.sensitive_limit.max_requests < config.auth_limit.max_requests);
    }

    #[test]
    fn development_relaxes_without_touching_abuse_defaults() {
        let config = SecurityConfig::development();
        assert!(!config.strict_rate_limit);
        assert!(!config.cookie_secure);
        assert!(config.expose_error_detail);
        assert!(config.abuse.enabled);
        assert_eq!(config.abuse.max_recent_failures, 5);
    }
}
