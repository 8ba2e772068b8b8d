//! Fixed-window rate limiting and the slow-down governor
//!
//! Counters are keyed by normalized client key. Window rollover and
//! increment happen under the per-key shard guard, so two concurrent
//! requests from the same key cannot both observe the old count.

use std::net::IpAddr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{
    Error,
    error::AbuseError,
    maintenance::Sweep,
};

/// Normalize a raw client identifier into a bucketing key.
///
/// IP addresses collapse to a canonical textual form so that equivalent
/// representations (IPv4-mapped IPv6, zero-compressed IPv6, mixed case)
/// share one bucket. Non-IP identifiers are lowercased and passed through.
pub fn normalize_client_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => v6.to_canonical().to_string(),
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// A named fixed-window policy: at most `max_requests` per `window`.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window request counter for one policy.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count a request against the key's current window.
    ///
    /// Returns [`AbuseError::RateLimited`] with the seconds until window
    /// reset once the count exceeds the policy maximum.
    pub fn check(&self, client_key: &str) -> Result<(), Error> {
        self.check_at(client_key, Utc::now())
    }

    fn check_at(&self, client_key: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let mut window = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.policy.window,
            });

        if now >= window.reset_at {
            window.count = 1;
            window.reset_at = now + self.policy.window;
            return Ok(());
        }

        window.count += 1;
        if window.count > self.policy.max_requests {
            let retry_after_secs = (window.reset_at - now).num_seconds().max(1) as u64;
            tracing::debug!(
                client_key,
                policy = self.policy.name,
                count = window.count,
                "rate limit exceeded"
            );
            return Err(AbuseError::RateLimited { retry_after_secs }.into());
        }

        Ok(())
    }
}

impl Sweep for RateLimiter {
    fn sweep(&self) {
        let now = Utc::now();
        self.windows.retain(|_, w| w.reset_at > now);
    }
}

/// Graduated-delay policy: past `threshold` requests in `window`, each
/// further request is delayed by an extra `delay_step`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct SlowDownPolicy {
    pub threshold: u32,
    pub delay_step: StdDuration,
    pub max_delay: StdDuration,
    pub window: Duration,
}

impl Default for SlowDownPolicy {
    fn default() -> Self {
        Self {
            threshold: 30,
            delay_step: StdDuration::from_millis(250),
            max_delay: StdDuration::from_secs(5),
            window: Duration::minutes(1),
        }
    }
}

/// The softer complement to the rate limiter: throttles scripted abuse with
/// an artificial delay instead of rejecting.
pub struct SlowDown {
    policy: SlowDownPolicy,
    windows: DashMap<String, Window>,
}

impl SlowDown {
    pub fn new(policy: SlowDownPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    /// Count a request and return the delay to apply before handling it,
    /// if any.
    pub fn delay_for(&self, client_key: &str) -> Option<StdDuration> {
        self.delay_for_at(client_key, Utc::now())
    }

    fn delay_for_at(&self, client_key: &str, now: DateTime<Utc>) -> Option<StdDuration> {
        let mut window = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.policy.window,
            });

        if now >= window.reset_at {
            window.count = 1;
            window.reset_at = now + self.policy.window;
            return None;
        }

        window.count += 1;
        let excess = window.count.checked_sub(self.policy.threshold)?;
        if excess == 0 {
            return None;
        }

        let delay = self.policy.delay_step.saturating_mul(excess);
        Some(delay.min(self.policy.max_delay))
    }
}

impl Sweep for SlowDown {
    fn sweep(&self) {
        let now = Utc::now();
        self.windows.retain(|_, w| w.reset_at > now);
    }
}
