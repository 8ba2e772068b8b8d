//! In-process abuse tracking: failed attempts, suspicion scores, blacklist
//!
//! State is process-local and ephemeral; a restart clears it. In a
//! multi-instance deployment each instance keeps its own counters; this is a
//! known limitation, not a bug.
//!
//! # Thread Safety
//!
//! All maps are sharded [`DashMap`]s; per-key mutation happens under the
//! shard guard so concurrent requests from the same key cannot under-count.
//! The periodic sweep only removes entries that are stale under its own
//! snapshot, and staleness is monotonic, so it cannot race destructively
//! with request handling.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::maintenance::Sweep;

/// Configuration for failed-attempt tracking and blacklist promotion.
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    pub enabled: bool,
    /// Recent-failure count that flags a key as suspicious.
    pub max_recent_failures: u32,
    /// Trailing window the recent-failure count is computed over.
    pub failure_window: Duration,
    /// Suspicion score past which a key is promoted to the blacklist.
    pub suspicion_ceiling: u32,
    /// Suspicion entries older than this (since first flagged) are purged.
    pub suspicion_horizon: Duration,
    /// Maximum retained attempts per key; oldest evicted on overflow.
    pub attempt_retention: usize,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recent_failures: 5,
            failure_window: Duration::minutes(15),
            suspicion_ceiling: 20,
            suspicion_horizon: Duration::hours(1),
            attempt_retention: 20,
        }
    }
}

impl AbuseConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// One failed authentication attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Suspicion {
    score: u32,
    first_flagged_at: DateTime<Utc>,
}

/// Tracks failed attempts, suspicion scores, and the blacklist per client
/// key.
///
/// Keys are normalized client identifiers (see
/// [`normalize_client_key`](crate::limiter::normalize_client_key)); the
/// tracker itself treats them as opaque.
pub struct AbuseTracker {
    config: AbuseConfig,
    attempts: DashMap<String, VecDeque<FailedAttempt>>,
    suspicion: DashMap<String, Suspicion>,
    blacklist: DashSet<String>,
}

impl AbuseTracker {
    pub fn new(config: AbuseConfig) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
            suspicion: DashMap::new(),
            blacklist: DashSet::new(),
        }
    }

    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record a failed attempt for a key and return the recent-failure count
    /// within the configured window.
    ///
    /// Crossing the recent-failure threshold increments the key's suspicion
    /// score; exceeding the suspicion ceiling promotes the key to the
    /// blacklist.
    pub fn record_failure(&self, client_key: &str, reason: &str) -> u32 {
        self.record_failure_at(client_key, reason, Utc::now())
    }

    fn record_failure_at(&self, client_key: &str, reason: &str, now: DateTime<Utc>) -> u32 {
        if !self.config.enabled {
            return 0;
        }

        let recent = {
            let mut log = self.attempts.entry(client_key.to_string()).or_default();
            log.push_back(FailedAttempt {
                at: now,
                reason: reason.to_string(),
            });
            while log.len() > self.config.attempt_retention {
                log.pop_front();
            }

            let cutoff = now - self.config.failure_window;
            log.iter().filter(|a| a.at > cutoff).count() as u32
        };

        if recent >= self.config.max_recent_failures {
            let score = {
                let mut entry = self
                    .suspicion
                    .entry(client_key.to_string())
                    .or_insert(Suspicion {
                        score: 0,
                        first_flagged_at: now,
                    });
                entry.score += 1;
                entry.score
            };

            tracing::debug!(client_key, score, recent, "brute-force threshold crossed");

            if score > self.config.suspicion_ceiling && self.blacklist.insert(client_key.to_string())
            {
                tracing::warn!(client_key, score, "client promoted to blacklist");
            }
        }

        recent
    }

    /// Recompute the trailing-window failure count against caller-supplied
    /// thresholds. This is the independently-configurable check; the fixed
    /// default lives in [`record_failure`](Self::record_failure).
    pub fn is_brute_force(&self, client_key: &str, max_attempts: u32, window: Duration) -> bool {
        self.is_brute_force_at(client_key, max_attempts, window, Utc::now())
    }

    fn is_brute_force_at(
        &self,
        client_key: &str,
        max_attempts: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let cutoff = now - window;
        self.attempts
            .get(client_key)
            .map(|log| log.iter().filter(|a| a.at > cutoff).count() as u32 >= max_attempts)
            .unwrap_or(false)
    }

    pub fn is_blacklisted(&self, client_key: &str) -> bool {
        self.blacklist.contains(client_key)
    }

    pub fn blacklist(&self, client_key: &str) {
        self.blacklist.insert(client_key.to_string());
    }

    /// Remove a key from the blacklist. Operator tooling only; nothing in
    /// the pipeline un-blacklists automatically.
    pub fn unblacklist(&self, client_key: &str) -> bool {
        self.blacklist.remove(client_key).is_some()
    }

    /// Drop the failed-attempt log for a key after a successful
    /// authentication. Does not touch the blacklist.
    pub fn clear_on_success(&self, client_key: &str) {
        self.attempts.remove(client_key);
    }

    fn sweep_at(&self, now: DateTime<Utc>) {
        let attempt_cutoff = now - self.config.failure_window;
        self.attempts.retain(|_, log| {
            while log.front().is_some_and(|a| a.at <= attempt_cutoff) {
                log.pop_front();
            }
            !log.is_empty()
        });

        let suspicion_cutoff = now - self.config.suspicion_horizon;
        self.suspicion
            .retain(|_, s| s.first_flagged_at > suspicion_cutoff);
    }

    #[cfg(test)]
    fn attempt_count(&self, client_key: &str) -> usize {
        self.attempts.get(client_key).map(|l| l.len()).unwrap_or(0)
    }
}

impl Sweep for AbuseTracker {
    /// Drop attempts older than the failure window and suspicion entries
    /// past the horizon. Blacklist entries are never swept.
    fn sweep(&self) {
        self.sweep_at(Utc::now());
    }
}
