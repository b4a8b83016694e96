//! Kernel configuration.
//!
//! All settings can be configured via environment variables:
//! - `RECS_CACHE_ENABLED`: Enable the recommendation cache (default: true)
//! - `RECS_CACHE_MAX_ENTRIES`: Cached users (default: 10000)
//! - `RECS_CACHE_TTL_SECS`: Recommendation time-to-live (default: 60)
//! - `RECONCILE_INTERVAL_SECS`: Reconciliation sweep interval (default: 30)
//! - `SYNC_MAX_RETRIES`: Retries per store write (default: 3)
//! - `SYNC_INITIAL_BACKOFF_MS`: First retry delay (default: 50)
//! - `SYNC_MAX_BACKOFF_MS`: Retry delay cap (default: 2000)
//! - `FEED_DEFAULT_LIMIT` / `FEED_MAX_LIMIT`: Feed page sizes (default: 50 / 200)
//! - `RECS_DEFAULT_LIMIT` / `RECS_MAX_LIMIT`: Recommendation sizes (default: 20 / 100)

use std::str::FromStr;
use std::time::Duration;

/// Read and parse an environment variable, falling back to `default`.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the recommendation cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of users with cached results.
    pub max_entries: usize,
    /// How long a cached ranking stays valid.
    pub ttl: Duration,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(60),
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("RECS_CACHE_MAX_ENTRIES", defaults.max_entries),
            ttl: Duration::from_secs(env_or("RECS_CACHE_TTL_SECS", defaults.ttl.as_secs())),
            enabled: env_or("RECS_CACHE_ENABLED", defaults.enabled),
        }
    }
}

/// Exponential backoff for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub backoff_multiplier: f64,
    /// Spread each delay by up to ±30% so concurrent callers do not retry
    /// in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Load retry configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_or("SYNC_MAX_RETRIES", defaults.max_retries),
            initial_backoff: Duration::from_millis(env_or(
                "SYNC_INITIAL_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )),
            max_backoff: Duration::from_millis(env_or(
                "SYNC_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )),
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: env_or("SYNC_RETRY_JITTER", defaults.jitter),
        }
    }

    /// Delay to wait after the given failed attempt (1-based), before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Top-level configuration shared by all kernel components.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Recommendation cache settings.
    pub cache: CacheConfig,
    /// Retry policy for dual-write store calls.
    pub retry: RetryPolicy,
    /// Interval between reconciliation sweeps. Bounds graph staleness.
    pub reconcile_interval: Duration,
    /// Feed size when the caller gives no limit.
    pub default_feed_limit: usize,
    /// Largest feed a caller may request.
    pub max_feed_limit: usize,
    /// Recommendation count when the caller gives no limit.
    pub default_recommendation_limit: usize,
    /// Largest recommendation list a caller may request.
    pub max_recommendation_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            reconcile_interval: Duration::from_secs(30),
            default_feed_limit: 50,
            max_feed_limit: 200,
            default_recommendation_limit: 20,
            max_recommendation_limit: 100,
        }
    }
}

impl KernelConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache: CacheConfig::from_env(),
            retry: RetryPolicy::from_env(),
            reconcile_interval: Duration::from_secs(env_or(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )),
            default_feed_limit: env_or("FEED_DEFAULT_LIMIT", defaults.default_feed_limit),
            max_feed_limit: env_or("FEED_MAX_LIMIT", defaults.max_feed_limit),
            default_recommendation_limit: env_or(
                "RECS_DEFAULT_LIMIT",
                defaults.default_recommendation_limit,
            ),
            max_recommendation_limit: env_or("RECS_MAX_LIMIT", defaults.max_recommendation_limit),
        }
    }

    /// Resolve a requested feed limit against the defaults and cap.
    pub fn feed_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_feed_limit)
            .min(self.max_feed_limit)
    }

    /// Resolve a requested recommendation limit against the defaults and cap.
    pub fn recommendation_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_recommendation_limit)
            .min(self.max_recommendation_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            jitter: true,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(8), Duration::from_millis(300));
    }

    #[test]
    fn test_limits_default_and_clamp() {
        let config = KernelConfig::default();

        assert_eq!(config.feed_limit(None), 50);
        assert_eq!(config.feed_limit(Some(10)), 10);
        assert_eq!(config.feed_limit(Some(10_000)), 200);
        assert_eq!(config.recommendation_limit(None), 20);
        assert_eq!(config.recommendation_limit(Some(0)), 0);
    }
}
